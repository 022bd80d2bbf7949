use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::ProbeError;
use crate::models::{EndpointConfig, EndpointSnapshot};
use crate::rpc::{self, RpcTransport};

/// Delay slept before retry `retry` (0-based). Doubles from `backoff_base`,
/// capped at `timeout / max_retries`. Delays never decrease.
pub fn backoff_delay(endpoint: &EndpointConfig, retry: u32) -> Duration {
    let cap = endpoint.timeout / endpoint.max_retries.max(1);
    endpoint
        .backoff_base
        .saturating_mul(2u32.saturating_pow(retry))
        .min(cap)
}

async fn attempt_once(
    transport: &dyn RpcTransport,
    endpoint: &EndpointConfig,
    deadline: Instant,
    cancel: &CancellationToken,
) -> EndpointSnapshot {
    let started = Instant::now();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            EndpointSnapshot::disconnected(endpoint, ProbeError::Cancelled, started.elapsed())
        }
        result = tokio::time::timeout_at(deadline, rpc::probe(transport, endpoint)) => {
            match result {
                Ok(snapshot) => snapshot,
                // the in-flight request future is dropped here, closing its connection
                Err(_) => EndpointSnapshot::disconnected(
                    endpoint,
                    ProbeError::Timeout(endpoint.timeout),
                    started.elapsed(),
                ),
            }
        }
    }
}

/// Probes one endpoint, retrying transport faults with backoff. Attempts and
/// sleeps together never run past `endpoint.timeout`.
pub async fn probe_with_retry(
    transport: &dyn RpcTransport,
    endpoint: &EndpointConfig,
    cancel: &CancellationToken,
) -> EndpointSnapshot {
    let started = Instant::now();
    // absurd timeouts saturate to a year instead of overflowing the clock
    let deadline = started
        .checked_add(endpoint.timeout)
        .unwrap_or_else(|| started + Duration::from_secs(365 * 24 * 60 * 60));

    let mut retry = 0u32;
    loop {
        let snapshot = attempt_once(transport, endpoint, deadline, cancel).await;

        let retryable = snapshot.error().is_some_and(ProbeError::is_retryable);
        if !retryable || retry >= endpoint.max_retries {
            return snapshot;
        }
        let delay = backoff_delay(endpoint, retry);
        // no point sleeping into a deadline that leaves nothing for the attempt
        if delay >= deadline.saturating_duration_since(Instant::now()) {
            return snapshot;
        }

        warn!(
            endpoint = %endpoint.nickname,
            attempt = retry + 1,
            max_retries = endpoint.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %snapshot.error().map(ToString::to_string).unwrap_or_default(),
            "retrying probe"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return EndpointSnapshot::disconnected(endpoint, ProbeError::Cancelled, snapshot.latency);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        retry += 1;
    }
}

/// Probes every endpoint concurrently, one task each. Snapshots come back in
/// input order regardless of completion order.
pub async fn run_cycle(
    transport: Arc<dyn RpcTransport>,
    endpoints: &[EndpointConfig],
    cancel: &CancellationToken,
) -> Vec<EndpointSnapshot> {
    let tasks: Vec<_> = endpoints
        .iter()
        .cloned()
        .map(|endpoint| {
            let transport = Arc::clone(&transport);
            let cancel = cancel.clone();
            task::spawn(async move { probe_with_retry(transport.as_ref(), &endpoint, &cancel).await })
        })
        .collect();

    join_all(tasks)
        .await
        .into_iter()
        .zip(endpoints)
        .map(|(joined, endpoint)| match joined {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_cancelled() => {
                EndpointSnapshot::disconnected(endpoint, ProbeError::Cancelled, Duration::ZERO)
            }
            Err(e) => {
                error!(endpoint = %endpoint.nickname, "probe task failed: {}", e);
                EndpointSnapshot::disconnected(
                    endpoint,
                    ProbeError::Connection(format!("probe task failed: {}", e)),
                    Duration::ZERO,
                )
            }
        })
        .collect()
}
