use super::{query, Collected, SharedSource};
use crate::error::PlatformQueryError;
use crate::source::MemoryReading;
use crate::types::{clamp_percent, MemoryMetrics};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Whole-gigabyte figures. `used_gb` is derived from the rounded total and free
/// values so the three always add up.
pub fn memory_metrics(r: MemoryReading) -> MemoryMetrics {
    let total_gb = (r.total_bytes as f64 / GIB).round() as u64;
    let free_gb = ((r.free_bytes.min(r.total_bytes)) as f64 / GIB).round() as u64;
    let used_bytes = r.total_bytes.saturating_sub(r.free_bytes);
    let usage_percent = if r.total_bytes == 0 {
        0.0
    } else {
        (used_bytes as f64 / r.total_bytes as f64 * 100.0).round() as f32
    };
    MemoryMetrics {
        total_gb,
        used_gb: total_gb.saturating_sub(free_gb),
        free_gb,
        usage_percent: clamp_percent(usage_percent),
    }
}

pub async fn collect(source: &SharedSource) -> Result<Collected<MemoryMetrics>, PlatformQueryError> {
    let reading = query(source, "memory", |s| s.memory()).await?;
    Ok(Collected::new(memory_metrics(reading)))
}
