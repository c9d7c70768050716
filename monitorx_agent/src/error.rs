//! Error types for sampling and delivery.
//!
//! None of these are fatal to the agent: a collector error degrades one section of a
//! snapshot, a tick error skips one interval, a delivery error drops one subscriber.

use std::fmt;
use std::time::Duration;

/// A raw OS query failed.
#[derive(Debug, thiserror::Error)]
pub enum PlatformQueryError {
    #[error("i/o error reading {what}: {source}")]
    Io {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error("blocking query task failed: {0}")]
    Join(String),

    #[error("previous {0} query is still running")]
    Busy(&'static str),
}

impl PlatformQueryError {
    pub fn io(what: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            what: what.into(),
            source,
        }
    }

    pub fn parse(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            detail: detail.into(),
        }
    }
}

/// The resource class a collector is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
    Network,
    Battery,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
            Resource::Disk => "disk",
            Resource::Network => "network",
            Resource::Battery => "battery",
        })
    }
}

/// One resource class could not be sampled this tick.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("{resource} collector failed: {source}")]
    Query {
        resource: Resource,
        #[source]
        source: PlatformQueryError,
    },

    #[error("{resource} collector timed out after {after:?}")]
    Timeout { resource: Resource, after: Duration },
}

impl CollectorError {
    pub fn query(resource: Resource, source: PlatformQueryError) -> Self {
        Self::Query { resource, source }
    }

    pub fn resource(&self) -> Resource {
        match self {
            CollectorError::Query { resource, .. } | CollectorError::Timeout { resource, .. } => {
                *resource
            }
        }
    }
}

/// A whole tick produced nothing worth publishing.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("all {0} collectors failed")]
    AllCollectorsFailed(usize),
}

/// A subscriber could not be reached.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber channel closed")]
    Closed,

    #[error("subscriber transport error: {0}")]
    Transport(String),
}
