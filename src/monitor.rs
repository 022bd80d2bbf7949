use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::models::RunStatus;
use crate::orchestrator::Orchestrator;
use crate::report::ProbeOutput;
use crate::rpc::RpcTransport;

/// One completed monitor cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: u64,
    pub observed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub output: ProbeOutput,
}

/// Fixed-capacity ring of recent cycles; the oldest record is evicted first.
#[derive(Debug)]
pub struct DriftHistory {
    capacity: usize,
    records: VecDeque<CycleRecord>,
}

impl DriftHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: CycleRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn latest(&self) -> Option<&CycleRecord> {
        self.records.back()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<CycleRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

pub type SharedHistory = Arc<RwLock<DriftHistory>>;

/// Runs probe cycles on a fixed interval until cancelled.
pub struct Monitor {
    config: AppConfig,
    transport: Arc<dyn RpcTransport>,
    interval: Duration,
    history: SharedHistory,
}

impl Monitor {
    pub fn new(config: AppConfig, transport: Arc<dyn RpcTransport>) -> Result<Self, ConfigError> {
        let interval = config.monitor.interval()?;
        config.endpoint_configs()?;
        let history = Arc::new(RwLock::new(DriftHistory::new(config.monitor.history)));
        Ok(Self {
            config,
            transport,
            interval,
            history,
        })
    }

    pub fn history(&self) -> SharedHistory {
        Arc::clone(&self.history)
    }

    /// Returns the status of the last cycle that ran to completion.
    pub async fn run<W: Write>(&self, out: &mut W, cancel: CancellationToken) -> anyhow::Result<RunStatus> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_status = RunStatus::Inconsistent;
        let mut cycle = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            cycle += 1;
            let observed_at = Utc::now();
            let mut orchestrator =
                Orchestrator::new(self.config.clone(), Arc::clone(&self.transport), cancel.child_token());
            let outcome = orchestrator.run(out).await?;

            if cancel.is_cancelled() {
                break;
            }

            last_status = outcome.status;
            self.history.write().await.push(CycleRecord {
                cycle,
                observed_at,
                output: ProbeOutput::new(&outcome.snapshots, &outcome.reports, outcome.status),
            });
        }

        info!(cycles = cycle, status = ?last_status, "monitor stopped");
        Ok(last_status)
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn latest_drift(State(history): State<SharedHistory>) -> Result<Json<CycleRecord>, StatusCode> {
    history
        .read()
        .await
        .latest()
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn drift_history(
    State(history): State<SharedHistory>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<CycleRecord>> {
    let history = history.read().await;
    let limit = query.limit.unwrap_or_else(|| history.len());
    Json(history.recent(limit))
}

pub fn router(history: SharedHistory) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/drift", get(latest_drift))
        .route("/api/history", get(drift_history))
        .with_state(history)
}

/// Serves the drift API until `cancel` fires. Returns the bound address.
pub fn spawn_server(
    addr: SocketAddr,
    history: SharedHistory,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind drift API on {}", addr))?
        .serve(router(history).into_make_service());
    let local_addr = server.local_addr();

    let handle = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = server.with_graceful_shutdown(shutdown).await {
            error!("drift API server failed: {}", e);
        }
    });

    info!("🚀 Drift API running on http://{}", local_addr);
    Ok((local_addr, handle))
}
