//! Mounted volumes and aggregate read/write throughput.
//!
//! Throughput comes from the cumulative I/O totals read once per tick, diffed against
//! the previous tick's totals. There is no intra-tick wait here, unlike the network
//! collector.

use tokio::time::Instant;
use tracing::debug;

use super::{query, round_to, Collected, SharedSource};
use crate::counters::{CounterSample, CounterStore};
use crate::error::PlatformQueryError;
use crate::source::VolumeReading;
use crate::types::{clamp_percent, DiskMetrics, VolumeMetrics};

pub const READ_KEY: &str = "disk.readBytes";
pub const WRITE_KEY: &str = "disk.writeBytes";

fn volume_metrics(v: VolumeReading, read_kbps: f64, write_kbps: f64) -> VolumeMetrics {
    let used = v.total_bytes.saturating_sub(v.available_bytes);
    let used_percent = if v.total_bytes == 0 {
        0.0
    } else {
        round_to(used as f64 / v.total_bytes as f64 * 100.0, 1) as f32
    };
    VolumeMetrics {
        filesystem_id: v.filesystem_id,
        mount_point: v.mount_point,
        size_bytes: v.total_bytes,
        used_percent: clamp_percent(used_percent),
        available_bytes: v.available_bytes,
        read_kbps,
        write_kbps,
    }
}

pub async fn collect(
    source: &SharedSource,
    counters: &CounterStore,
    now: Instant,
) -> Result<Collected<DiskMetrics>, PlatformQueryError> {
    let volumes = query(source, "volumes", |s| s.volumes()).await?;

    // A missing throughput counter only zeroes the speeds.
    let mut readings = Vec::new();
    let (read_kbps, write_kbps) = match query(source, "disk i/o", |s| s.disk_io_totals()).await {
        Ok(io) => {
            let r = counters.rate(READ_KEY, io.read_bytes, now) / 1024.0;
            let w = counters.rate(WRITE_KEY, io.written_bytes, now) / 1024.0;
            readings.push(CounterSample::new(READ_KEY, io.read_bytes, now));
            readings.push(CounterSample::new(WRITE_KEY, io.written_bytes, now));
            (round_to(r, 2), round_to(w, 2))
        }
        Err(e) => {
            debug!("disk throughput unavailable: {e}");
            (0.0, 0.0)
        }
    };

    Ok(Collected {
        value: DiskMetrics {
            volumes: volumes
                .into_iter()
                .map(|v| volume_metrics(v, read_kbps, write_kbps))
                .collect(),
        },
        readings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fake::FakeSource;
    use crate::source::DiskIoTotals;
    use std::sync::Arc;
    use std::time::Duration;

    fn root_volume() -> VolumeReading {
        VolumeReading {
            filesystem_id: "/dev/nvme0n1p2".into(),
            mount_point: "/".into(),
            total_bytes: 1000,
            available_bytes: 250,
        }
    }

    #[tokio::test]
    async fn throughput_is_rate_since_previous_tick() {
        let src: SharedSource = Arc::new(FakeSource::with(|s| {
            s.volumes = Some(vec![root_volume()]);
            s.disk_io.push_back(DiskIoTotals {
                read_bytes: 10 * 1024,
                written_bytes: 0,
            });
            s.disk_io.push_back(DiskIoTotals {
                read_bytes: 30 * 1024,
                written_bytes: 4 * 1024,
            });
        }));
        let mut store = CounterStore::new();
        let t0 = Instant::now();

        let first = collect(&src, &store, t0).await.unwrap();
        assert_eq!(first.value.volumes[0].read_kbps, 0.0);
        assert_eq!(first.value.volumes[0].used_percent, 75.0);
        for r in first.readings {
            store.record_sample(r);
        }

        let second = collect(&src, &store, t0 + Duration::from_secs(2)).await.unwrap();
        let v = &second.value.volumes[0];
        assert_eq!(v.read_kbps, 10.0);
        assert_eq!(v.write_kbps, 2.0);
        assert_eq!(v.filesystem_id, "/dev/nvme0n1p2");
        assert_eq!(v.available_bytes, 250);
    }

    #[tokio::test]
    async fn throughput_failure_keeps_volumes() {
        let src: SharedSource = Arc::new(FakeSource::with(|s| {
            s.volumes = Some(vec![root_volume()]);
        }));
        let out = collect(&src, &CounterStore::new(), Instant::now())
            .await
            .unwrap();
        assert_eq!(out.value.volumes.len(), 1);
        assert_eq!(out.value.volumes[0].read_kbps, 0.0);
        assert_eq!(out.value.volumes[0].write_kbps, 0.0);
        assert!(out.readings.is_empty());
    }

    #[tokio::test]
    async fn volume_failure_fails_the_collector() {
        let src: SharedSource = Arc::new(FakeSource::default());
        assert!(collect(&src, &CounterStore::new(), Instant::now())
            .await
            .is_err());
    }
}
