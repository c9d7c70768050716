//! Live host resource monitor: samples CPU, memory, disk, network and battery on a
//! fixed cadence while clients are connected, keeps a short trend history, and fans
//! each snapshot out over WebSocket.

pub mod collectors;
pub mod config;
pub mod counters;
pub mod error;
pub mod history;
pub mod http;
pub mod hub;
pub mod optimize;
pub mod processes;
pub mod sampler;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod types;
pub mod ws;
