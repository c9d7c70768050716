//! Throughput of the primary interface, measured over a short window inside the tick.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use super::{query, round_to, Collected, SharedSource};
use crate::counters::{rate_between, CounterSample, CounterStore};
use crate::error::PlatformQueryError;
use crate::source::InterfaceReading;
use crate::types::NetworkMetrics;

fn rx_key(iface: &str) -> String {
    format!("net.{iface}.rxBytes")
}

fn tx_key(iface: &str) -> String {
    format!("net.{iface}.txBytes")
}

/// Name prefixes of loopback, bridge, container and tunnel interfaces.
const VIRTUAL_PREFIXES: &[&str] = &[
    "lo", "docker", "br-", "veth", "virbr", "vnet", "cni", "flannel", "tun", "tap", "wg",
    "zt", "tailscale", "vmnet", "vboxnet", "utun", "awdl", "llw", "bridge",
];

pub fn is_virtual(name: &str) -> bool {
    VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Sources list interfaces sorted by name, so "first" is alphabetical. A physical
/// interface that is up wins; then any interface that is up; then the first listed.
pub fn primary_interface(list: &[InterfaceReading]) -> Option<&InterfaceReading> {
    list.iter()
        .find(|i| i.is_up && !is_virtual(&i.name))
        .or_else(|| list.iter().find(|i| i.is_up))
        .or_else(|| list.first())
}

pub async fn collect(
    source: &SharedSource,
    counters: &CounterStore,
    window: Duration,
) -> Result<Collected<NetworkMetrics>, PlatformQueryError> {
    let first = query(source, "interfaces", |s| s.interfaces()).await;
    let first_at = Instant::now();
    if let Err(e) = &first {
        debug!("first interface reading failed, using previous tick as baseline: {e}");
    }

    sleep(window).await;

    let second = query(source, "interfaces", |s| s.interfaces()).await?;
    let now = Instant::now();

    let first = first.unwrap_or_default();
    let chosen = primary_interface(&first)
        .map(|i| i.name.clone())
        .or_else(|| primary_interface(&second).map(|i| i.name.clone()));
    let Some(chosen) = chosen else {
        return Ok(Collected::new(NetworkMetrics::default()));
    };
    // The interface may have vanished between the two readings.
    let Some(cur) = second
        .iter()
        .find(|i| i.name == chosen)
        .or_else(|| second.first())
    else {
        return Ok(Collected::new(NetworkMetrics::default()));
    };

    let (rx_k, tx_k) = (rx_key(&cur.name), tx_key(&cur.name));
    let (rx_prev, tx_prev) = match first.iter().find(|i| i.name == cur.name) {
        Some(b) => (
            Some(CounterSample::new(rx_k.clone(), b.rx_bytes, first_at)),
            Some(CounterSample::new(tx_k.clone(), b.tx_bytes, first_at)),
        ),
        None => (counters.previous(&rx_k).cloned(), counters.previous(&tx_k).cloned()),
    };
    let per_sec = |prev: Option<CounterSample>, value: u64| {
        prev.map(|p| rate_between(&p, value, now) / 1024.0)
            .unwrap_or(0.0)
    };

    Ok(Collected {
        value: NetworkMetrics {
            interface_id: Some(cur.name.clone()),
            download_kbps: round_to(per_sec(rx_prev, cur.rx_bytes), 2),
            upload_kbps: round_to(per_sec(tx_prev, cur.tx_bytes), 2),
        },
        readings: vec![
            CounterSample::new(rx_k, cur.rx_bytes, now),
            CounterSample::new(tx_k, cur.tx_bytes, now),
        ],
    })
}
