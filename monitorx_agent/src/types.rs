//! Data types sent to subscribers over WebSocket and the REST endpoints.
//! Field names here are the JSON wire format; renames are breaking changes.

use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use time::OffsetDateTime;

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    pub usage_percent: f32,
    pub core_count: usize,
    pub per_core_usage: Vec<f32>,
    pub model_name: String,
    /// Maximum clock: the cpufreq ceiling on Linux, else the highest current core clock.
    #[serde(rename = "clockSpeedGHz")]
    pub clock_speed_ghz: f32,
    #[serde(rename = "baseClockGHz")]
    pub base_clock_ghz: f32,
    pub temperature_c: Option<f32>,
    // true when temperature_c is synthesized rather than read from a sensor
    pub temperature_estimated: bool,
}

impl Default for CpuMetrics {
    fn default() -> Self {
        Self {
            usage_percent: 0.0,
            core_count: 0,
            per_core_usage: Vec::new(),
            model_name: "Unknown".into(),
            clock_speed_ghz: 0.0,
            base_clock_ghz: 0.0,
            temperature_c: None,
            temperature_estimated: false,
        }
    }
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct MemoryMetrics {
    #[serde(rename = "totalGB")]
    pub total_gb: u64,
    #[serde(rename = "usedGB")]
    pub used_gb: u64,
    #[serde(rename = "freeGB")]
    pub free_gb: u64,
    #[serde(rename = "usagePercent")]
    pub usage_percent: f32,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMetrics {
    pub filesystem_id: String,
    pub mount_point: String,
    pub size_bytes: u64,
    pub used_percent: f32,
    pub available_bytes: u64,
    #[serde(rename = "readKBps")]
    pub read_kbps: f64,
    #[serde(rename = "writeKBps")]
    pub write_kbps: f64,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct DiskMetrics {
    pub volumes: Vec<VolumeMetrics>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct NetworkMetrics {
    #[serde(rename = "interfaceId")]
    pub interface_id: Option<String>,
    #[serde(rename = "downloadKBps")]
    pub download_kbps: f64,
    #[serde(rename = "uploadKBps")]
    pub upload_kbps: f64,
}

#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatteryStatus {
    Charging,
    Discharging,
    Connected,
    #[default]
    Unknown,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatteryMetrics {
    pub status: BatteryStatus,
    pub percentage: u8,
    pub is_plugged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Default for BatteryMetrics {
    fn default() -> Self {
        Self {
            status: BatteryStatus::Unknown,
            percentage: 0,
            is_plugged: false,
            note: None,
        }
    }
}

/// One fully-assembled reading for a single tick.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub hostname: String,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub disk: DiskMetrics,
    pub network: NetworkMetrics,
    pub battery: BatteryMetrics,
    pub process_count: usize,
}

/// Condensed projection of a [`Snapshot`] kept for trend charts.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub disk_percent: f32,
}

impl From<&Snapshot> for HistoryEntry {
    fn from(s: &Snapshot) -> Self {
        Self {
            timestamp: s.timestamp,
            cpu_percent: s.cpu.usage_percent,
            mem_percent: s.memory.usage_percent,
            disk_percent: s
                .disk
                .volumes
                .first()
                .map(|v| v.used_percent)
                .unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu: f32,
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
}

/// Everything the hub pushes to a subscriber. Serialized as
/// `{"event": <name>, "payload": <body>}`.
#[derive(Debug, Clone)]
pub enum HubMessage {
    Snapshot(Arc<Snapshot>),
    History(Vec<HistoryEntry>),
    /// One-shot named event (e.g. `optimizationComplete`).
    Event {
        event: String,
        payload: serde_json::Value,
    },
}

impl HubMessage {
    pub fn event_name(&self) -> &str {
        match self {
            HubMessage::Snapshot(_) => "systemUpdate",
            HubMessage::History(_) => "history",
            HubMessage::Event { event, .. } => event,
        }
    }
}

impl Serialize for HubMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("event", self.event_name())?;
        match self {
            HubMessage::Snapshot(s) => map.serialize_entry("payload", s.as_ref())?,
            HubMessage::History(h) => map.serialize_entry("payload", h)?,
            HubMessage::Event { payload, .. } => map.serialize_entry("payload", payload)?,
        }
        map.end()
    }
}

pub fn clamp_percent(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 100.0)
    }
}
