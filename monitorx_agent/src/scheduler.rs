//! Drives the sampler on a fixed cadence while anyone is listening.
//!
//! Two states: `Idle` (no subscribers, no timer) and `Sampling` (timer running). The
//! hub's subscriber count moves us between them. Each timer firing runs one tick
//! (sample -> history -> fan-out) on its own task; a firing that finds the previous
//! tick still running is dropped, never queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::TickError;
use crate::history::HistoryBuffer;
use crate::hub::BroadcastHub;
use crate::sampler::Sampler;
use crate::types::{HistoryEntry, Snapshot};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Sampling,
}

#[derive(Debug, Default)]
pub struct TickStats {
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub skipped: AtomicU64,
}

/// One tick end to end. The snapshot reaches history and subscribers only once fully
/// assembled.
pub async fn run_tick(
    sampler: &Mutex<Sampler>,
    history: &HistoryBuffer,
    hub: &BroadcastHub,
) -> Result<Arc<Snapshot>, TickError> {
    let snapshot = Arc::new(sampler.lock().await.tick().await?);
    history.append(HistoryEntry::from(snapshot.as_ref()));
    let delivered = hub.publish(Arc::clone(&snapshot));
    debug!(
        delivered,
        cpu = snapshot.cpu.usage_percent,
        "tick published"
    );
    Ok(snapshot)
}

pub struct Scheduler {
    sampler: Arc<Mutex<Sampler>>,
    history: Arc<HistoryBuffer>,
    hub: Arc<BroadcastHub>,
    period: Duration,
}

pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SchedulerState>,
    stats: Arc<TickStats>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop. A tick already running is left to finish.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub async fn join(self) {
        if let Err(e) = self.join.await {
            warn!("scheduler task ended abnormally: {e}");
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }
}

impl Scheduler {
    pub fn new(
        sampler: Arc<Mutex<Sampler>>,
        history: Arc<HistoryBuffer>,
        hub: Arc<BroadcastHub>,
        period: Duration,
    ) -> Self {
        Self {
            sampler,
            history,
            hub,
            period,
        }
    }

    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let stats = Arc::new(TickStats::default());
        let join = tokio::spawn(self.run(stop_rx, state_tx, Arc::clone(&stats)));
        SchedulerHandle {
            stop_tx,
            state_rx,
            stats,
            join,
        }
    }

    fn spawn_tick(&self, stats: &Arc<TickStats>) -> JoinHandle<()> {
        let sampler = Arc::clone(&self.sampler);
        let history = Arc::clone(&self.history);
        let hub = Arc::clone(&self.hub);
        let stats = Arc::clone(stats);
        stats.started.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            match run_tick(&sampler, &history, &hub).await {
                Ok(_) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("tick failed, nothing published: {e}");
                }
            }
        })
    }

    async fn run(
        self,
        mut stop_rx: watch::Receiver<bool>,
        state_tx: watch::Sender<SchedulerState>,
        stats: Arc<TickStats>,
    ) {
        let mut count_rx = self.hub.watch_count();
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            // Idle: wait for the first subscriber.
            state_tx.send_replace(SchedulerState::Idle);
            loop {
                if *stop_rx.borrow_and_update() {
                    return;
                }
                if *count_rx.borrow_and_update() > 0 {
                    break;
                }
                tokio::select! {
                    r = count_rx.changed() => if r.is_err() { return },
                    r = stop_rx.changed() => if r.is_err() { return },
                }
            }

            state_tx.send_replace(SchedulerState::Sampling);
            info!(period_ms = self.period.as_millis() as u64, "sampling started");
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        info!("scheduler stopped");
                        return;
                    }
                    r = count_rx.changed() => {
                        if r.is_err() {
                            return;
                        }
                        if *count_rx.borrow_and_update() == 0 {
                            info!("last subscriber left, sampling paused");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                            stats.skipped.fetch_add(1, Ordering::Relaxed);
                            debug!("previous tick still running, skipping this one");
                            continue;
                        }
                        in_flight = Some(self.spawn_tick(&stats));
                    }
                }
            }
        }
    }
}
