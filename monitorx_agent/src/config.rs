//! Agent configuration: a few command-line flags plus `MONITORX_AGENT_*` variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::history::DEFAULT_CAPACITY;
use crate::processes::{DEFAULT_TOP_N, DEFAULT_TTL};
use crate::sampler::SamplerOptions;
use crate::scheduler::DEFAULT_PERIOD;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub port: u16,
    pub sample_interval: Duration,
    pub history_capacity: usize,
    pub net_window: Duration,
    pub collector_timeout: Duration,
    pub processes_ttl: Duration,
    pub top_n: usize,
    pub synth_temp: bool,
    pub optimize_dir: PathBuf,
    pub subscriber_queue: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let sampler = SamplerOptions::default();
        Self {
            port: DEFAULT_PORT,
            sample_interval: DEFAULT_PERIOD,
            history_capacity: DEFAULT_CAPACITY,
            net_window: sampler.net_window,
            collector_timeout: sampler.collector_timeout,
            processes_ttl: DEFAULT_TTL,
            top_n: DEFAULT_TOP_N,
            synth_temp: sampler.synth_temp,
            optimize_dir: std::env::temp_dir(),
            subscriber_queue: DEFAULT_QUEUE_DEPTH,
        }
    }
}

pub fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--port PORT|-p PORT]\n\n\
         Environment:\n  \
         MONITORX_AGENT_PORT, MONITORX_AGENT_SAMPLE_MS, MONITORX_AGENT_HISTORY,\n  \
         MONITORX_AGENT_NET_WINDOW_MS, MONITORX_AGENT_COLLECTOR_TIMEOUT_MS,\n  \
         MONITORX_AGENT_PROCESSES_TTL_MS, MONITORX_AGENT_TOP_N, MONITORX_AGENT_SYNTH_TEMP,\n  \
         MONITORX_AGENT_OPTIMIZE_DIR, MONITORX_AGENT_SUBSCRIBER_QUEUE"
    )
}

/// Port from `--port N`, `-p N` or `--port=N`; the long form wins over `-p`.
/// Anything unparsable leaves `default_port`.
pub fn parse_port<I: IntoIterator<Item = String>>(args: I, default_port: u16) -> u16 {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut long: Option<String> = None;
    let mut short: Option<String> = None;
    while let Some(a) = it.next() {
        match a.as_str() {
            "--port" => long = it.next(),
            "-p" => short = it.next(),
            _ if a.starts_with("--port=") => {
                if let Some((_, v)) = a.split_once('=') {
                    long = Some(v.to_string());
                }
            }
            _ => {}
        }
    }
    long.or(short)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(default_port)
}

fn wants_help(args: &[String]) -> bool {
    args.iter().skip(1).any(|a| a == "-h" || a == "--help")
}

fn parsed<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    env(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn millis(env: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_millis(parsed(env, key, default.as_millis() as u64))
}

impl AgentConfig {
    /// Build from process args and environment. `Err` carries the usage text when
    /// help was requested.
    pub fn from_env_and_args() -> Result<Self, String> {
        Self::from_parts(std::env::args().collect(), |k| std::env::var(k).ok())
    }

    pub fn from_parts(
        args: Vec<String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        if wants_help(&args) {
            let prog = args.first().map(String::as_str).unwrap_or("monitorx_agent");
            return Err(usage(prog));
        }
        let d = Self::default();
        let env_port = parsed(&env, "MONITORX_AGENT_PORT", d.port);
        let positive = |v: usize, fallback: usize| if v == 0 { fallback } else { v };
        let sample_interval = millis(&env, "MONITORX_AGENT_SAMPLE_MS", d.sample_interval);

        Ok(Self {
            port: parse_port(args, env_port),
            sample_interval: if sample_interval.is_zero() {
                d.sample_interval
            } else {
                sample_interval
            },
            history_capacity: positive(
                parsed(&env, "MONITORX_AGENT_HISTORY", d.history_capacity),
                d.history_capacity,
            ),
            net_window: millis(&env, "MONITORX_AGENT_NET_WINDOW_MS", d.net_window),
            collector_timeout: millis(
                &env,
                "MONITORX_AGENT_COLLECTOR_TIMEOUT_MS",
                d.collector_timeout,
            ),
            processes_ttl: millis(&env, "MONITORX_AGENT_PROCESSES_TTL_MS", d.processes_ttl),
            top_n: positive(parsed(&env, "MONITORX_AGENT_TOP_N", d.top_n), d.top_n),
            synth_temp: env("MONITORX_AGENT_SYNTH_TEMP")
                .map(|v| v.trim() != "0")
                .unwrap_or(d.synth_temp),
            optimize_dir: env("MONITORX_AGENT_OPTIMIZE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(d.optimize_dir),
            subscriber_queue: positive(
                parsed(&env, "MONITORX_AGENT_SUBSCRIBER_QUEUE", d.subscriber_queue),
                d.subscriber_queue,
            ),
        })
    }

    pub fn sampler_options(&self) -> SamplerOptions {
        SamplerOptions {
            collector_timeout: self.collector_timeout,
            net_window: self.net_window,
            synth_temp: self.synth_temp,
        }
    }
}
