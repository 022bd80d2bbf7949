use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes a probe can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectionFailure,
    Timeout,
    MalformedResponse,
    RpcError,
    Cancelled,
}

/// Prints the same snake_case name the kind serializes to.
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.serialize(f)
    }
}

/// Error produced while probing one endpoint. Always recovered into an
/// `EndpointSnapshot`, never surfaced past the scheduler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeError {
    #[error("connection failure: {0}")]
    Connection(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Connection(_) => ErrorKind::ConnectionFailure,
            ProbeError::Timeout(_) => ErrorKind::Timeout,
            ProbeError::Malformed(_) => ErrorKind::MalformedResponse,
            ProbeError::Rpc { .. } => ErrorKind::RpcError,
            ProbeError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Transport faults are worth another attempt. A well-formed answer from
    /// the node, even an erroring one, is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::Connection(_) | ProbeError::Timeout(_))
    }
}

/// Invalid configuration. Fatal before any network call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("a secondary endpoint is required to compare against the primary")]
    MissingSecondary,

    #[error("invalid endpoint URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("timeout for '{url}' must be a positive number of seconds, got {secs}")]
    NonPositiveTimeout { url: String, secs: f64 },

    #[error("monitor interval must be a positive number of seconds, got {0}")]
    InvalidInterval(f64),

    #[error("monitor history must hold at least one cycle")]
    InvalidHistory,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
