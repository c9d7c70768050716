//! Shared agent state handed to every HTTP/WS handler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::collectors::SharedSource;
use crate::config::AgentConfig;
use crate::history::HistoryBuffer;
use crate::hub::BroadcastHub;
use crate::processes::ProcessLister;
use crate::sampler::Sampler;

pub type SharedSampler = Arc<Mutex<Sampler>>;

#[derive(Clone)]
pub struct AppState {
    // Shared with the scheduler; REST cold-start ticks go through the same lock
    pub sampler: SharedSampler,
    pub history: Arc<HistoryBuffer>,
    pub hub: Arc<BroadcastHub>,
    pub processes: Arc<ProcessLister>,
    pub optimize_dir: PathBuf,
    /// A cached snapshot older than this is resampled by `GET /api/system/stats`.
    pub sample_interval: Duration,
}

impl AppState {
    pub fn new(source: SharedSource, hostname: impl Into<String>, cfg: &AgentConfig) -> Self {
        let sampler = Sampler::new(Arc::clone(&source), hostname, cfg.sampler_options());
        Self {
            sampler: Arc::new(Mutex::new(sampler)),
            history: Arc::new(HistoryBuffer::new(cfg.history_capacity)),
            hub: Arc::new(BroadcastHub::new(cfg.subscriber_queue)),
            processes: Arc::new(ProcessLister::new(source, cfg.top_n, cfg.processes_ttl)),
            optimize_dir: cfg.optimize_dir.clone(),
            sample_interval: cfg.sample_interval,
        }
    }
}
