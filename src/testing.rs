//! In-memory transport for scheduler and orchestrator tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ProbeError;
use crate::models::{ChainHead, EndpointConfig};
use crate::rpc::RpcTransport;

pub(crate) fn endpoint(nickname: &str, url: &str) -> EndpointConfig {
    EndpointConfig {
        nickname: nickname.to_string(),
        url: url.to_string(),
        timeout: Duration::from_secs(10),
        max_retries: 0,
        backoff_base: Duration::from_millis(100),
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    head: Option<ChainHead>,
    delay: Duration,
    failure: Option<(Option<&'static str>, ProbeError)>,
    flaky: Option<(usize, ProbeError)>,
}

/// Answers JSON-RPC calls from a per-URL script and counts probe attempts
/// (one `eth_chainId` per attempt).
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    nodes: HashMap<String, Node>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, url: &str) -> &mut Node {
        self.nodes.entry(url.to_string()).or_default()
    }

    pub(crate) fn healthy(mut self, url: &str, head: ChainHead) -> Self {
        self.node(url).head = Some(head);
        self
    }

    /// Every call fails.
    pub(crate) fn failing(mut self, url: &str, err: ProbeError) -> Self {
        self.node(url).failure = Some((None, err));
        self
    }

    /// Only `method` fails.
    pub(crate) fn failing_on(mut self, url: &str, method: &'static str, err: ProbeError) -> Self {
        self.node(url).failure = Some((Some(method), err));
        self
    }

    /// Every call sleeps `delay` before answering.
    pub(crate) fn slow(mut self, url: &str, delay: Duration) -> Self {
        self.node(url).delay = delay;
        self
    }

    /// The first `failures` attempts fail with `err`.
    pub(crate) fn flaky(mut self, url: &str, failures: usize, err: ProbeError) -> Self {
        self.node(url).flaky = Some((failures, err));
        self
    }

    pub(crate) fn attempts(&self, url: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value, ProbeError> {
        let node = self
            .nodes
            .get(url)
            .ok_or_else(|| ProbeError::Connection(format!("unknown host {}", url)))?;

        let attempt = if method == "eth_chainId" {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        } else {
            0
        };

        if !node.delay.is_zero() {
            tokio::time::sleep(node.delay).await;
        }

        if let Some((failures, err)) = &node.flaky {
            if attempt != 0 && attempt <= *failures {
                return Err(err.clone());
            }
        }
        if let Some((only, err)) = &node.failure {
            if only.map_or(true, |m| m == method) {
                return Err(err.clone());
            }
        }

        let head = node
            .head
            .ok_or_else(|| ProbeError::Malformed("no scripted head".to_string()))?;
        match method {
            "eth_chainId" => Ok(json!(format!("{:#x}", head.chain_id))),
            "eth_blockNumber" => Ok(json!(format!("{:#x}", head.block_number))),
            "eth_getBlockByNumber" => Ok(json!({
                "number": params[0],
                "timestamp": format!("{:#x}", head.block_timestamp),
            })),
            other => Err(ProbeError::Rpc {
                code: -32601,
                message: format!("method {} not found", other),
            }),
        }
    }
}
