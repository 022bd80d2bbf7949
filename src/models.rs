use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ProbeError};

/// One RPC target, fully resolved and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub nickname: String,
    pub url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

/// Chain state read from a reachable endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub chain_id: u64,
    pub block_number: u64,
    /// Seconds since the Unix epoch.
    pub block_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotState {
    Connected(ChainHead),
    Disconnected(ProbeError),
}

/// Result of probing one endpoint once.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSnapshot {
    pub nickname: String,
    pub url: String,
    pub latency: Duration,
    pub state: SnapshotState,
}

impl EndpointSnapshot {
    pub fn connected(endpoint: &EndpointConfig, head: ChainHead, latency: Duration) -> Self {
        Self {
            nickname: endpoint.nickname.clone(),
            url: endpoint.url.clone(),
            latency,
            state: SnapshotState::Connected(head),
        }
    }

    pub fn disconnected(endpoint: &EndpointConfig, error: ProbeError, latency: Duration) -> Self {
        Self {
            nickname: endpoint.nickname.clone(),
            url: endpoint.url.clone(),
            latency,
            state: SnapshotState::Disconnected(error),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SnapshotState::Connected(_))
    }

    pub fn head(&self) -> Option<&ChainHead> {
        match &self.state {
            SnapshotState::Connected(head) => Some(head),
            SnapshotState::Disconnected(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ProbeError> {
        match &self.state {
            SnapshotState::Connected(_) => None,
            SnapshotState::Disconnected(err) => Some(err),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(ProbeError::kind)
    }

    /// Latency only means something when all three calls succeeded.
    pub fn latency_ms(&self) -> Option<f64> {
        self.is_connected()
            .then(|| (self.latency.as_secs_f64() * 1000.0 * 1000.0).round() / 1000.0)
    }
}

/// Drift levels above which a warning is raised. `None` never warns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftThresholds {
    pub max_block_drift: Option<u64>,
    pub max_time_drift_sec: Option<u64>,
}

/// Comparison of one secondary endpoint against the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub primary_label: String,
    pub primary_url: String,
    pub secondary_label: String,
    pub secondary_url: String,
    pub block_diff: Option<i64>,
    pub time_diff_sec: Option<i64>,
    pub consistent_chain: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Inconsistent,
}

impl RunStatus {
    pub fn from_reports(reports: &[DriftReport]) -> Self {
        if !reports.is_empty() && reports.iter().all(|r| r.consistent_chain) {
            RunStatus::Success
        } else {
            RunStatus::Inconsistent
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Inconsistent => 2,
        }
    }
}
