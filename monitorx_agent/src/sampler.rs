//! One sampling tick: run every collector, assemble an immutable [`Snapshot`], and
//! record the raw counter readings the collectors consumed.

use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::collectors::{battery, cpu, disk, memory, network, query, Collected, SharedSource};
use crate::counters::{CounterSample, CounterStore};
use crate::error::{CollectorError, PlatformQueryError, Resource, TickError};
use crate::types::Snapshot;

const COLLECTOR_COUNT: usize = 5;

#[derive(Debug, Clone)]
pub struct SamplerOptions {
    /// Upper bound for any single collector (the network window is added on top).
    pub collector_timeout: Duration,
    pub net_window: Duration,
    pub synth_temp: bool,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            collector_timeout: Duration::from_secs(5),
            net_window: Duration::from_secs(1),
            synth_temp: true,
        }
    }
}

pub struct Sampler {
    source: SharedSource,
    counters: CounterStore,
    hostname: String,
    opts: SamplerOptions,
}

async fn bounded<T, F>(
    resource: Resource,
    after: Duration,
    fut: F,
) -> Result<Collected<T>, CollectorError>
where
    F: Future<Output = Result<Collected<T>, PlatformQueryError>>,
{
    match timeout(after, fut).await {
        Ok(Ok(c)) => Ok(c),
        Ok(Err(e)) => Err(CollectorError::query(resource, e)),
        Err(_) => Err(CollectorError::Timeout { resource, after }),
    }
}

// Failed sections fall back to their zeroed/"Unknown" defaults.
fn settle<T: Default>(
    r: Result<Collected<T>, CollectorError>,
    failed: &mut usize,
    readings: &mut Vec<CounterSample>,
) -> T {
    match r {
        Ok(c) => {
            readings.extend(c.readings);
            c.value
        }
        Err(e) => {
            warn!(resource = %e.resource(), "collector failed: {e}");
            *failed += 1;
            T::default()
        }
    }
}

impl Sampler {
    pub fn new(source: SharedSource, hostname: impl Into<String>, opts: SamplerOptions) -> Self {
        Self {
            source,
            counters: CounterStore::new(),
            hostname: hostname.into(),
            opts,
        }
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub async fn tick(&mut self) -> Result<Snapshot, TickError> {
        let now = Instant::now();
        let limit = self.opts.collector_timeout;
        let src = &self.source;
        let counters = &self.counters;

        let (cpu_r, mem_r, disk_r, net_r, bat_r, procs) = tokio::join!(
            bounded(
                Resource::Cpu,
                limit,
                cpu::collect(src, counters, self.opts.synth_temp, now)
            ),
            bounded(Resource::Memory, limit, memory::collect(src)),
            bounded(Resource::Disk, limit, disk::collect(src, counters, now)),
            bounded(
                Resource::Network,
                limit + self.opts.net_window,
                network::collect(src, counters, self.opts.net_window)
            ),
            bounded(Resource::Battery, limit, async {
                Ok(Collected::new(battery::collect(src).await))
            }),
            timeout(limit, query(src, "process count", |s| s.process_count())),
        );

        let mut failed = 0;
        let mut readings = Vec::new();
        let cpu = settle(cpu_r, &mut failed, &mut readings);
        let memory = settle(mem_r, &mut failed, &mut readings);
        let disk = settle(disk_r, &mut failed, &mut readings);
        let network = settle(net_r, &mut failed, &mut readings);
        let battery = settle(bat_r, &mut failed, &mut readings);

        if failed == COLLECTOR_COUNT {
            return Err(TickError::AllCollectorsFailed(failed));
        }

        let process_count = match procs {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("process count unavailable: {e}");
                0
            }
            Err(_) => {
                debug!("process count timed out");
                0
            }
        };

        for r in readings {
            self.counters.record_sample(r);
        }

        Ok(Snapshot {
            timestamp: OffsetDateTime::now_utc(),
            hostname: self.hostname.clone(),
            cpu,
            memory,
            disk,
            network,
            battery,
            process_count,
        })
    }
}
