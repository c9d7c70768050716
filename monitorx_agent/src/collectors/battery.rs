//! Battery charge via a three-tier fallback chain:
//!
//! 1. primary query: charge percentage and charging state;
//! 2. secondary query: percentage only, state reported as `Unknown`;
//! 3. no battery at all: a permanently plugged-in desktop at 100%.
//!
//! Each tier runs only after the previous one failed, and none of them retries.
//! The secondary tier prefers the source's external command, spawned so that it is
//! killed when the collector's timeout drops the future.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{query, SharedSource};
use crate::error::PlatformQueryError;
use crate::source::{BatteryCommand, BatteryReading, ChargeState};
use crate::types::{BatteryMetrics, BatteryStatus};

pub const DESKTOP_NOTE: &str = "No battery detected (Desktop PC)";

/// Which tier produced the reading.
#[derive(Debug, Clone, PartialEq)]
pub enum BatteryOutcome {
    Primary(BatteryReading),
    PercentOnly(u8),
    Desktop,
}

impl From<BatteryOutcome> for BatteryMetrics {
    fn from(o: BatteryOutcome) -> Self {
        match o {
            BatteryOutcome::Primary(r) => {
                let status = match r.state {
                    ChargeState::Charging => BatteryStatus::Charging,
                    ChargeState::Discharging => BatteryStatus::Discharging,
                    ChargeState::Full | ChargeState::NotCharging => BatteryStatus::Connected,
                    ChargeState::Unknown => BatteryStatus::Unknown,
                };
                BatteryMetrics {
                    status,
                    percentage: r.percentage.min(100),
                    is_plugged: status != BatteryStatus::Discharging,
                    note: None,
                }
            }
            BatteryOutcome::PercentOnly(p) => BatteryMetrics {
                status: BatteryStatus::Unknown,
                percentage: p.min(100),
                is_plugged: true,
                note: None,
            },
            BatteryOutcome::Desktop => BatteryMetrics {
                status: BatteryStatus::Connected,
                percentage: 100,
                is_plugged: true,
                note: Some(DESKTOP_NOTE.to_string()),
            },
        }
    }
}

static PERCENT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\d+)\s*%").ok());

fn first_integer(s: &str) -> Option<u32> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let digits: String = s[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Percentage from the secondary query's raw output: a number followed by `%`
/// wins (upower and pmset print ids and dates first); otherwise the first
/// integer anywhere. No number at all reads as 100.
pub fn parse_percentage(raw: &str) -> u8 {
    PERCENT
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .or_else(|| first_integer(raw))
        .map(|p| p.min(100) as u8)
        .unwrap_or(100)
}

/// Run the battery command; dropping the returned future kills the child.
pub async fn run_command(cmd: BatteryCommand) -> Result<String, PlatformQueryError> {
    let out = tokio::process::Command::new(cmd.program)
        .args(cmd.args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PlatformQueryError::io(cmd.program, e))?;
    if !out.status.success() {
        return Err(PlatformQueryError::parse(
            cmd.program,
            format!("exited with {}", out.status),
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

async fn secondary(source: &SharedSource) -> Result<String, PlatformQueryError> {
    match source.battery_command() {
        Some(cmd) => run_command(cmd).await,
        None => query(source, "battery percentage", |s| s.battery_secondary()).await,
    }
}

pub async fn detect(source: &SharedSource) -> BatteryOutcome {
    match query(source, "battery", |s| s.battery_primary()).await {
        Ok(r) => return BatteryOutcome::Primary(r),
        Err(e) => debug!("primary battery query failed: {e}"),
    }
    match secondary(source).await {
        Ok(raw) => BatteryOutcome::PercentOnly(parse_percentage(&raw)),
        Err(e) => {
            debug!("secondary battery query failed, assuming desktop: {e}");
            BatteryOutcome::Desktop
        }
    }
}

pub async fn collect(source: &SharedSource) -> BatteryMetrics {
    detect(source).await.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fake::FakeSource;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn secondary_tier_reports_unknown_and_plugged() {
        let src: SharedSource = Arc::new(FakeSource::with(|s| {
            s.battery_secondary = Some("42".into());
        }));
        let b = collect(&src).await;
        assert_eq!(b.percentage, 42);
        assert_eq!(b.status, BatteryStatus::Unknown);
        assert!(b.is_plugged);
        assert!(b.note.is_none());
    }

    #[tokio::test]
    async fn primary_tier_wins_when_available() {
        let src: SharedSource = Arc::new(FakeSource::with(|s| {
            s.battery_primary = Some(BatteryReading {
                percentage: 64,
                state: ChargeState::Discharging,
            });
            s.battery_secondary = Some("99".into());
        }));
        let b = collect(&src).await;
        assert_eq!(b.percentage, 64);
        assert_eq!(b.status, BatteryStatus::Discharging);
        assert!(!b.is_plugged);
    }

    #[tokio::test]
    async fn exhausted_chain_assumes_desktop() {
        let src: SharedSource = Arc::new(FakeSource::default());
        assert_eq!(detect(&src).await, BatteryOutcome::Desktop);
        let b = collect(&src).await;
        assert_eq!(b.percentage, 100);
        assert_eq!(b.status, BatteryStatus::Connected);
        assert!(b.is_plugged);
        assert_eq!(b.note.as_deref(), Some(DESKTOP_NOTE));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_output_feeds_the_secondary_tier() {
        let src: SharedSource = Arc::new(FakeSource::with(|s| {
            s.battery_command = Some(BatteryCommand {
                program: "echo",
                args: &["percentage:", "77%"],
            });
            s.battery_secondary = Some("12".into());
        }));
        assert_eq!(detect(&src).await, BatteryOutcome::PercentOnly(77));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_command_is_abandoned_at_the_timeout() {
        let src: SharedSource = Arc::new(FakeSource::with(|s| {
            s.battery_command = Some(BatteryCommand {
                program: "sleep",
                args: &["5"],
            });
        }));
        let started = std::time::Instant::now();
        let res = tokio::time::timeout(Duration::from_millis(100), detect(&src)).await;
        assert!(res.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_falls_through_to_desktop() {
        let src: SharedSource = Arc::new(FakeSource::with(|s| {
            s.battery_command = Some(BatteryCommand {
                program: "false",
                args: &[],
            });
        }));
        assert_eq!(detect(&src).await, BatteryOutcome::Desktop);
    }

    #[test]
    fn full_and_not_charging_map_to_connected() {
        for state in [ChargeState::Full, ChargeState::NotCharging] {
            let b: BatteryMetrics = BatteryOutcome::Primary(BatteryReading {
                percentage: 100,
                state,
            })
            .into();
            assert_eq!(b.status, BatteryStatus::Connected);
            assert!(b.is_plugged);
        }
    }

    #[test]
    fn percentage_parsing() {
        assert_eq!(parse_percentage("EstimatedChargeRemaining  \r\n57  \r\n"), 57);
        assert_eq!(
            parse_percentage(
                "  updated:  Mon 19 Oct 2026 10:00:01 (3 seconds ago)\n  percentage:          81%\n"
            ),
            81
        );
        assert_eq!(
            parse_percentage("Now drawing from 'AC Power'\n -InternalBattery-0 (id=123)\t93%; charged;"),
            93
        );
        assert_eq!(parse_percentage("no digits here"), 100);
        assert_eq!(parse_percentage("250"), 100);
    }
}
