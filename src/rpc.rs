use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProbeError;
use crate::models::{ChainHead, EndpointConfig, EndpointSnapshot};

/// Network seam between the adapter and the wire. One call is one JSON-RPC
/// request against `url`, returning the raw `result` value.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value, ProbeError>;
}

#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    error: Option<JsonRpcError>,
    // `null` is a legitimate result (unknown block), absence is not
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-RPC over HTTP(S) with a pooled reqwest client shared by every
/// endpoint task.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(300))
            .pool_max_idle_per_host(20)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(concat!("rpc-drift-probe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value, ProbeError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Uuid::new_v4().to_string(),
            method,
            params,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let body = response.text().await.map_err(transport_error)?;
        decode_response(&body)
    }
}

fn transport_error(err: reqwest::Error) -> ProbeError {
    // the client sets no request timeout, so only connecting can time out
    if err.is_timeout() {
        ProbeError::Timeout(CONNECT_TIMEOUT)
    } else if err.is_decode() {
        ProbeError::Malformed(err.to_string())
    } else {
        ProbeError::Connection(err.to_string())
    }
}

fn classify_status(status: StatusCode) -> ProbeError {
    let message = format!("HTTP error: {}", status);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ProbeError::Connection(message)
    } else {
        ProbeError::Malformed(message)
    }
}

fn decode_response(body: &str) -> Result<Value, ProbeError> {
    let rpc_response: JsonRpcResponse =
        serde_json::from_str(body).map_err(|e| ProbeError::Malformed(e.to_string()))?;

    if let Some(error) = rpc_response.error {
        return Err(ProbeError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    rpc_response
        .result
        .ok_or_else(|| ProbeError::Malformed("missing result in RPC response".to_string()))
}

/// Parses an Ethereum JSON-RPC quantity (`"0x3e8"`). Plain decimal strings
/// and JSON numbers are tolerated.
pub fn parse_quantity(value: &Value) -> Result<u64, ProbeError> {
    match value {
        Value::String(s) => {
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) if !hex.is_empty() => u64::from_str_radix(hex, 16),
                Some(_) => return Err(ProbeError::Malformed(format!("empty quantity '{}'", s))),
                None => s.parse::<u64>(),
            };
            parsed.map_err(|e| ProbeError::Malformed(format!("invalid quantity '{}': {}", s, e)))
        }
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ProbeError::Malformed(format!("invalid quantity {}", n))),
        other => Err(ProbeError::Malformed(format!(
            "expected quantity, got {}",
            other
        ))),
    }
}

async fn read_chain_head(transport: &dyn RpcTransport, url: &str) -> Result<ChainHead, ProbeError> {
    let chain_id = parse_quantity(&transport.call(url, "eth_chainId", json!([])).await?)?;
    let block_number = parse_quantity(&transport.call(url, "eth_blockNumber", json!([])).await?)?;

    let block = transport
        .call(
            url,
            "eth_getBlockByNumber",
            json!([format!("{:#x}", block_number), false]),
        )
        .await?;
    if block.is_null() {
        return Err(ProbeError::Malformed("latest block not found".to_string()));
    }
    let timestamp = block
        .get("timestamp")
        .ok_or_else(|| ProbeError::Malformed("block has no timestamp".to_string()))?;

    Ok(ChainHead {
        chain_id,
        block_number,
        block_timestamp: parse_quantity(timestamp)?,
    })
}

/// Reads chain id, head number and head timestamp from one endpoint. Any
/// failure marks the whole snapshot disconnected; latency covers the full
/// sequence or runs until the first failure.
pub async fn probe(transport: &dyn RpcTransport, endpoint: &EndpointConfig) -> EndpointSnapshot {
    let started = Instant::now();
    let result = read_chain_head(transport, &endpoint.url).await;
    let latency = started.elapsed();

    match result {
        Ok(head) => {
            debug!(
                endpoint = %endpoint.nickname,
                chain_id = head.chain_id,
                block = head.block_number,
                latency_ms = latency.as_millis() as u64,
                "probe succeeded"
            );
            EndpointSnapshot::connected(endpoint, head, latency)
        }
        Err(err) => {
            debug!(endpoint = %endpoint.nickname, error = %err, "probe failed");
            EndpointSnapshot::disconnected(endpoint, err, latency)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{endpoint, ScriptedTransport};
    use mockito::Matcher;

    fn head(chain_id: u64, block_number: u64, block_timestamp: u64) -> ChainHead {
        ChainHead {
            chain_id,
            block_number,
            block_timestamp,
        }
    }

    #[test]
    fn parses_hex_and_decimal_quantities() {
        assert_eq!(parse_quantity(&json!("0x3e8")).unwrap(), 1000);
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
        assert_eq!(parse_quantity(&json!("42")).unwrap(), 42);
        assert_eq!(parse_quantity(&json!(7)).unwrap(), 7);
    }

    #[test]
    fn rejects_bad_quantities() {
        for bad in [json!("0x"), json!("0xzz"), json!(-1), json!(null), json!({})] {
            let err = parse_quantity(&bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedResponse, "{}", bad);
        }
    }

    #[test]
    fn decodes_rpc_error_object() {
        let err = decode_response(
            r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32601,"message":"method not found"}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ProbeError::Rpc {
                code: -32601,
                message: "method not found".into()
            }
        );
    }

    #[test]
    fn null_result_is_not_missing_result() {
        let value = decode_response(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(value.is_null());

        let err = decode_response(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);

        let err = decode_response("<html>bad gateway</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn status_codes_split_transient_from_definitive() {
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY).kind(),
            ErrorKind::ConnectionFailure
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS).kind(),
            ErrorKind::ConnectionFailure
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND).kind(),
            ErrorKind::MalformedResponse
        );
    }

    #[tokio::test]
    async fn probe_reads_full_chain_head() {
        let transport = ScriptedTransport::new().healthy("http://a", head(1, 1000, 5000));
        let snap = probe(&transport, &endpoint("primary", "http://a")).await;

        assert_eq!(snap.head(), Some(&head(1, 1000, 5000)));
        assert_eq!(snap.nickname, "primary");
        assert_eq!(snap.url, "http://a");
    }

    #[tokio::test]
    async fn partial_success_is_reported_as_disconnected() {
        let transport = ScriptedTransport::new()
            .healthy("http://a", head(1, 1000, 5000))
            .failing_on(
                "http://a",
                "eth_getBlockByNumber",
                ProbeError::Rpc {
                    code: -32000,
                    message: "header not found".into(),
                },
            );
        let snap = probe(&transport, &endpoint("primary", "http://a")).await;

        assert!(!snap.is_connected());
        assert!(snap.head().is_none());
        assert_eq!(snap.error_kind(), Some(ErrorKind::RpcError));
    }

    #[tokio::test]
    async fn http_transport_probes_a_node() {
        let mut server = mockito::Server::new_async().await;
        let _chain = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_chainId"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":"x","result":"0x1"}"#)
            .create_async()
            .await;
        let _number = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_blockNumber"})))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":"x","result":"0x3e8"}"#)
            .create_async()
            .await;
        let _block = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_getBlockByNumber",
                "params": ["0x3e8", false]
            })))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":"x","result":{"number":"0x3e8","timestamp":"0x1388"}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let snap = probe(&transport, &endpoint("primary", &server.url())).await;

        assert_eq!(snap.head(), Some(&head(1, 1000, 5000)));
    }

    #[tokio::test]
    async fn http_transport_maps_unknown_block_to_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _chain = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_chainId"})))
            .with_body(r#"{"jsonrpc":"2.0","id":"x","result":"0x1"}"#)
            .create_async()
            .await;
        let _number = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_blockNumber"})))
            .with_body(r#"{"jsonrpc":"2.0","id":"x","result":"0x10"}"#)
            .create_async()
            .await;
        let _block = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_getBlockByNumber"})))
            .with_body(r#"{"jsonrpc":"2.0","id":"x","result":null}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let snap = probe(&transport, &endpoint("primary", &server.url())).await;

        let err = snap.error().unwrap();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert!(err.to_string().contains("latest block not found"));
    }

    #[tokio::test]
    async fn http_transport_surfaces_server_errors_as_connection_failures() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(503)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .call(&server.url(), "eth_chainId", json!([]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
    }

    #[tokio::test]
    async fn http_transport_reports_refused_connections() {
        // nothing listens on the discard port in test environments
        let transport = HttpTransport::new().unwrap();
        let err = transport
            .call("http://127.0.0.1:9", "eth_chainId", json!([]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
    }
}
