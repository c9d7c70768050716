//! Previous raw readings of cumulative counters, used to turn them into rates.
//!
//! Keys are stable strings such as `cpu.totalTicks` or `net.eth0.rxBytes`. Only the
//! sampler writes here, once per key per tick, after the rate has been derived.

use std::collections::HashMap;

use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct CounterSample {
    pub key: String,
    pub value: u64,
    pub at: Instant,
}

impl CounterSample {
    pub fn new(key: impl Into<String>, value: u64, at: Instant) -> Self {
        Self {
            key: key.into(),
            value,
            at,
        }
    }
}

/// Increase from `prev` to `value`. `None` when the counter went backwards
/// (reset or wrap); callers report no movement for that interval.
pub fn counter_delta(prev: u64, value: u64) -> Option<u64> {
    value.checked_sub(prev)
}

/// Units per second between a previous sample and a new raw reading.
pub fn rate_between(prev: &CounterSample, value: u64, at: Instant) -> f64 {
    let secs = at.saturating_duration_since(prev.at).as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    match counter_delta(prev.value, value) {
        Some(d) => d as f64 / secs,
        None => 0.0,
    }
}

#[derive(Debug, Default)]
pub struct CounterStore {
    samples: HashMap<String, CounterSample>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self, key: &str) -> Option<&CounterSample> {
        self.samples.get(key)
    }

    pub fn record(&mut self, key: impl Into<String>, value: u64, at: Instant) {
        let key = key.into();
        self.samples
            .insert(key.clone(), CounterSample { key, value, at });
    }

    pub fn record_sample(&mut self, sample: CounterSample) {
        self.samples.insert(sample.key.clone(), sample);
    }

    /// Rate against the stored predecessor; 0 when the key has never been seen.
    pub fn rate(&self, key: &str, value: u64, at: Instant) -> f64 {
        self.previous(key)
            .map(|prev| rate_between(prev, value, at))
            .unwrap_or(0.0)
    }

    /// Raw increase against the stored predecessor.
    pub fn delta(&self, key: &str, value: u64) -> Option<u64> {
        self.previous(key)
            .and_then(|prev| counter_delta(prev.value, value))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
