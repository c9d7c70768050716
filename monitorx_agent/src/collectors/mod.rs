//! One collector per resource class. Each turns raw [`HostSource`] readings (and, for
//! counter-based metrics, the previous readings in the [`CounterStore`]) into one
//! section of a snapshot. Collectors never write the counter store themselves; they
//! hand back the raw readings they consumed and the sampler records them.
//!
//! [`CounterStore`]: crate::counters::CounterStore

pub mod battery;
pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::counters::CounterSample;
use crate::error::PlatformQueryError;
use crate::source::HostSource;

pub type SharedSource = Arc<dyn HostSource>;

/// A collector's section plus the counter readings to record once the tick completes.
#[derive(Debug, Clone)]
pub struct Collected<T> {
    pub value: T,
    pub readings: Vec<CounterSample>,
}

impl<T> Collected<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            readings: Vec::new(),
        }
    }
}

// (source address, query name) pairs with a blocking call still running. The
// running closure holds a clone of the source Arc, so an address cannot be reused
// while its entry is present.
static IN_FLIGHT: Lazy<Mutex<HashSet<(usize, &'static str)>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

fn in_flight() -> MutexGuard<'static, HashSet<(usize, &'static str)>> {
    IN_FLIGHT.lock().unwrap_or_else(|e| e.into_inner())
}

struct InFlightGuard((usize, &'static str));

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        in_flight().remove(&self.0);
    }
}

/// Run a blocking source query on the blocking pool.
///
/// A timed-out caller stops waiting but cannot cancel the blocking call, so at most
/// one call per `what` and source runs at a time; while one is still running, a new
/// query fails fast with [`PlatformQueryError::Busy`].
pub(crate) async fn query<T, F>(
    source: &SharedSource,
    what: &'static str,
    f: F,
) -> Result<T, PlatformQueryError>
where
    T: Send + 'static,
    F: FnOnce(&dyn HostSource) -> Result<T, PlatformQueryError> + Send + 'static,
{
    let key = (Arc::as_ptr(source) as *const () as usize, what);
    if !in_flight().insert(key) {
        return Err(PlatformQueryError::Busy(what));
    }
    let guard = InFlightGuard(key);
    let src = Arc::clone(source);
    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        f(src.as_ref())
    })
    .await
    .map_err(|e| PlatformQueryError::Join(e.to_string()))?
}

pub(crate) fn round_to(v: f64, decimals: i32) -> f64 {
    let m = 10f64.powi(decimals);
    (v * m).round() / m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fake::FakeSource;
    use std::time::Duration;

    #[tokio::test]
    async fn second_query_fails_fast_while_first_still_runs() {
        let src: SharedSource = Arc::new(FakeSource::with(|s| {
            s.battery_stall = Some(Duration::from_millis(300));
        }));
        let first = tokio::spawn({
            let src = Arc::clone(&src);
            async move { query(&src, "battery", |s| s.battery_primary()).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = query(&src, "battery", |s| s.battery_primary()).await;
        assert!(matches!(second, Err(PlatformQueryError::Busy("battery"))));
        // Other queries against the same source are not held up.
        assert!(!matches!(
            query(&src, "memory", |s| s.memory()).await,
            Err(PlatformQueryError::Busy(_))
        ));

        let _ = first.await;
        let third = query(&src, "battery", |s| s.battery_primary()).await;
        assert!(!matches!(third, Err(PlatformQueryError::Busy(_))));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(2.456, 2), 2.46);
        assert_eq!(round_to(12.34, 1), 12.3);
    }
}
