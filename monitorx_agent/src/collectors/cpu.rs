//! CPU usage from per-core tick deltas, plus model/clock/temperature.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use tokio::time::Instant;
use tracing::debug;

use super::{query, round_to, Collected, SharedSource};
use crate::counters::{CounterSample, CounterStore};
use crate::error::PlatformQueryError;
use crate::source::{CoreTimes, CpuInfo};
use crate::types::{clamp_percent, CpuMetrics};

/// Reported when the model name carries no "<n>GHz" marker.
pub const DEFAULT_BASE_CLOCK_GHZ: f32 = 3.6;

/// Synthesized temperatures fall in this range (°C).
pub const SYNTH_TEMP_RANGE: std::ops::Range<f32> = 50.0..70.0;

static GHZ: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)GHz").ok());

pub fn parse_base_clock_ghz(model: &str) -> f32 {
    GHZ.as_ref()
        .and_then(|re| re.captures(model))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .unwrap_or(DEFAULT_BASE_CLOCK_GHZ)
}

fn sum_cores(cores: &[CoreTimes]) -> CoreTimes {
    cores.iter().fold(CoreTimes::default(), |a, c| CoreTimes {
        user: a.user.saturating_add(c.user),
        nice: a.nice.saturating_add(c.nice),
        system: a.system.saturating_add(c.system),
        idle: a.idle.saturating_add(c.idle),
        iowait: a.iowait.saturating_add(c.iowait),
        irq: a.irq.saturating_add(c.irq),
        softirq: a.softirq.saturating_add(c.softirq),
        steal: a.steal.saturating_add(c.steal),
    })
}

fn busy_percent(busy: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent(round_to(busy as f64 * 100.0 / total as f64, 1) as f32)
}

/// Usage for one tick-counter pair, keyed `<prefix>.totalTicks` / `<prefix>.idleTicks`.
/// With no usable predecessor the single reading's own idle ratio is used.
fn usage_for(
    counters: &CounterStore,
    prefix: &str,
    times: &CoreTimes,
    now: Instant,
    readings: &mut Vec<CounterSample>,
) -> f32 {
    let total_key = format!("{prefix}.totalTicks");
    let idle_key = format!("{prefix}.idleTicks");
    let total = times.total();
    let idle = times.idle_total();

    let pct = match (counters.delta(&total_key, total), counters.delta(&idle_key, idle)) {
        (Some(dt), Some(di)) if dt > 0 => busy_percent(dt.saturating_sub(di), dt),
        _ => busy_percent(total.saturating_sub(idle), total),
    };

    readings.push(CounterSample::new(total_key, total, now));
    readings.push(CounterSample::new(idle_key, idle, now));
    pct
}

pub async fn collect(
    source: &SharedSource,
    counters: &CounterStore,
    synth_temp: bool,
    now: Instant,
) -> Result<Collected<CpuMetrics>, PlatformQueryError> {
    let cores = query(source, "cpu times", |s| s.cpu_times()).await?;
    let info = query(source, "cpu info", |s| s.cpu_info()).await.unwrap_or_else(|e| {
        debug!("cpu info unavailable: {e}");
        CpuInfo::default()
    });
    let sensor = query(source, "cpu temperature", |s| Ok(s.cpu_temperature())).await.ok().flatten();

    let mut readings = Vec::with_capacity(2 * (cores.len() + 1));
    let usage_percent = usage_for(counters, "cpu", &sum_cores(&cores), now, &mut readings);
    let per_core_usage = cores
        .iter()
        .enumerate()
        .map(|(i, c)| usage_for(counters, &format!("cpu{i}"), c, now, &mut readings))
        .collect();

    let (temperature_c, temperature_estimated) = match sensor {
        Some(t) => (Some(t), false),
        None if synth_temp => (Some(rand::rng().random_range(SYNTH_TEMP_RANGE)), true),
        None => (None, false),
    };

    let model_name = if info.model.is_empty() {
        "Unknown".to_string()
    } else {
        info.model
    };

    Ok(Collected {
        value: CpuMetrics {
            usage_percent,
            core_count: cores.len(),
            per_core_usage,
            base_clock_ghz: parse_base_clock_ghz(&model_name),
            model_name,
            clock_speed_ghz: round_to(info.max_frequency_mhz as f64 / 1000.0, 2) as f32,
            temperature_c,
            temperature_estimated,
        },
        readings,
    })
}
