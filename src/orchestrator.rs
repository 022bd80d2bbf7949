use std::io::{self, Write};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::drift::analyze_star;
use crate::error::ConfigError;
use crate::models::{DriftReport, EndpointSnapshot, RunStatus};
use crate::report::render;
use crate::rpc::RpcTransport;
use crate::scheduler::run_cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configuring,
    Probing,
    Analyzing,
    Reporting,
    Done,
    Failed,
}

impl RunState {
    fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Configuring, Probing)
                | (Configuring, Failed)
                | (Probing, Analyzing)
                | (Analyzing, Reporting)
                | (Reporting, Done)
                | (Reporting, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),

    #[error("failed to write report: {0}")]
    Write(#[from] io::Error),

    #[error("run already finished in state {0:?}")]
    AlreadyRun(RunState),
}

impl RunError {
    /// Configuration problems classify the run like any other inconsistency.
    pub fn status(&self) -> Option<RunStatus> {
        match self {
            RunError::Config(_) => Some(RunStatus::Inconsistent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub snapshots: Vec<EndpointSnapshot>,
    pub reports: Vec<DriftReport>,
    pub status: RunStatus,
}

/// Drives a single probe cycle from configuration to written report.
pub struct Orchestrator {
    config: AppConfig,
    transport: Arc<dyn RpcTransport>,
    cancel: CancellationToken,
    state: RunState,
}

impl Orchestrator {
    pub fn new(config: AppConfig, transport: Arc<dyn RpcTransport>, cancel: CancellationToken) -> Self {
        Self {
            config,
            transport,
            cancel,
            state: RunState::Configuring,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }

    fn write_report<W: Write>(
        &self,
        out: &mut W,
        snapshots: &[EndpointSnapshot],
        reports: &[DriftReport],
        status: RunStatus,
    ) -> Result<(), RunError> {
        let rendered = render(snapshots, reports, status, self.config.format)?;
        out.write_all(rendered.as_bytes())?;
        if !rendered.ends_with('\n') {
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }

    /// Runs the cycle and writes the rendered report to `out`.
    pub async fn run<W: Write>(&mut self, out: &mut W) -> Result<RunOutcome, RunError> {
        if self.state.is_terminal() {
            return Err(RunError::AlreadyRun(self.state));
        }

        let endpoints = match self.config.endpoint_configs() {
            Ok(endpoints) => endpoints,
            Err(e) => {
                error!("invalid configuration: {}", e);
                self.advance(RunState::Failed);
                return Err(e.into());
            }
        };

        self.advance(RunState::Probing);
        let snapshots = run_cycle(Arc::clone(&self.transport), &endpoints, &self.cancel).await;

        self.advance(RunState::Analyzing);
        let reports = analyze_star(&snapshots, &self.config.thresholds);
        let status = RunStatus::from_reports(&reports);
        for report in &reports {
            for warning in &report.warnings {
                warn!(secondary = %report.secondary_label, "{}", warning);
            }
        }

        self.advance(RunState::Reporting);
        if let Err(e) = self.write_report(out, &snapshots, &reports, status) {
            self.advance(RunState::Failed);
            return Err(e);
        }

        self.advance(RunState::Done);
        info!(
            endpoints = snapshots.len(),
            connected = snapshots.iter().filter(|s| s.is_connected()).count(),
            status = ?status,
            "probe cycle complete"
        );

        Ok(RunOutcome {
            snapshots,
            reports,
            status,
        })
    }
}
