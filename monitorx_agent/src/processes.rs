//! Top processes by resident memory, behind a short TTL cache so a burst of REST
//! calls doesn't rescan the process table each time.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::collectors::{query, round_to, SharedSource};
use crate::error::PlatformQueryError;
use crate::source::RawProcess;
use crate::types::ProcessInfo;

pub const DEFAULT_TOP_N: usize = 20;
pub const DEFAULT_TTL: Duration = Duration::from_millis(1_500);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug)]
pub struct CacheSlot<T> {
    at: Option<Instant>,
    v: Option<T>,
}

impl<T: Clone> CacheSlot<T> {
    pub fn new() -> Self {
        Self { at: None, v: None }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.at.is_some_and(|t| t.elapsed() < ttl)
    }

    pub fn take_clone(&self) -> Option<T> {
        self.v.clone()
    }

    pub fn set(&mut self, v: T) {
        self.v = Some(v);
        self.at = Some(Instant::now());
    }
}

impl<T: Clone> Default for CacheSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort by RSS (largest first), keep `n`, convert memory to MB with 2 decimals.
pub fn top_by_memory(mut procs: Vec<RawProcess>, n: usize) -> Vec<ProcessInfo> {
    procs.sort_by(|a, b| b.rss_bytes.cmp(&a.rss_bytes).then(a.pid.cmp(&b.pid)));
    procs.truncate(n);
    procs
        .into_iter()
        .map(|p| ProcessInfo {
            pid: p.pid,
            name: p.name,
            cpu: round_to(
                if p.cpu_usage.is_finite() {
                    p.cpu_usage.max(0.0) as f64
                } else {
                    0.0
                },
                1,
            ) as f32,
            memory_mb: round_to(p.rss_bytes as f64 / BYTES_PER_MB, 2),
        })
        .collect()
}

pub struct ProcessLister {
    source: SharedSource,
    top_n: usize,
    ttl: Duration,
    cache: Mutex<CacheSlot<Vec<ProcessInfo>>>,
}

impl ProcessLister {
    pub fn new(source: SharedSource, top_n: usize, ttl: Duration) -> Self {
        Self {
            source,
            top_n,
            ttl,
            cache: Mutex::new(CacheSlot::new()),
        }
    }

    pub async fn top(&self) -> Result<Vec<ProcessInfo>, PlatformQueryError> {
        {
            let cache = self.cache.lock().await;
            if cache.is_fresh(self.ttl) {
                if let Some(v) = cache.take_clone() {
                    return Ok(v);
                }
            }
        }
        let raw = query(&self.source, "process list", |s| s.processes()).await?;
        let list = top_by_memory(raw, self.top_n);
        self.cache.lock().await.set(list.clone());
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fake::FakeSource;
    use std::sync::Arc;

    fn raw(pid: u32, name: &str, mb: u64) -> RawProcess {
        RawProcess {
            pid,
            name: name.into(),
            cpu_usage: 1.25,
            rss_bytes: mb * 1024 * 1024,
        }
    }

    #[test]
    fn sorts_by_rss_and_truncates() {
        let procs = (1..=30).map(|i| raw(i, &format!("p{i}"), i as u64)).collect();
        let top = top_by_memory(procs, DEFAULT_TOP_N);
        assert_eq!(top.len(), 20);
        assert_eq!(top[0].pid, 30);
        assert_eq!(top[0].memory_mb, 30.0);
        assert_eq!(top[19].pid, 11);
    }

    #[test]
    fn memory_in_megabytes_with_two_decimals() {
        let p = RawProcess {
            pid: 7,
            name: "node".into(),
            cpu_usage: 3.14159,
            rss_bytes: 1_572_864 + 10_486,
        };
        let top = top_by_memory(vec![p], 5);
        assert_eq!(top[0].memory_mb, 1.51);
        assert_eq!(top[0].cpu, 3.1);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_within_ttl() {
        let src = Arc::new(FakeSource::with(|s| {
            s.processes = Some(vec![raw(1, "a", 10)]);
        }));
        let lister = ProcessLister::new(src.clone(), 5, Duration::from_millis(1_500));
        assert_eq!(lister.top().await.unwrap()[0].name, "a");

        src.edit(|s| s.processes = Some(vec![raw(2, "b", 20)]));
        assert_eq!(lister.top().await.unwrap()[0].name, "a");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(lister.top().await.unwrap()[0].name, "b");
    }

    #[tokio::test]
    async fn query_failure_propagates() {
        let lister = ProcessLister::new(Arc::new(FakeSource::default()), 5, DEFAULT_TTL);
        assert!(lister.top().await.is_err());
    }
}
