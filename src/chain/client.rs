use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::{ChainTransaction, StateSummary};
use crate::error::RpcError;

/// Read access to a settlement network node.
///
/// Blocks are returned in the node's own encoding; the protocol strategy for
/// the stream knows how to normalize them.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The latest block.
    async fn head(&self) -> Result<Value, RpcError>;

    /// Up to `count` consecutive blocks starting at `from`. Nodes may return
    /// fewer or more than requested.
    async fn blocks(&self, from: u64, count: u64) -> Result<Vec<Value>, RpcError>;

    async fn transaction(&self, hash: &str) -> Result<ChainTransaction, RpcError>;

    /// Aggregate state as of "now". Takes no block parameter.
    async fn state_summary(&self) -> Result<StateSummary, RpcError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryBlockResponse {
    block: Value,
}

#[derive(Debug, Deserialize)]
struct QueryBlocksResponse {
    blocks: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryTxResponse {
    tx: ChainTransaction,
}

#[derive(Debug, Deserialize)]
struct QueryBlockStateResponse {
    state: PackedState,
}

/// Packed value: `t` is the type description, `v` the value itself.
#[derive(Debug, Deserialize)]
struct PackedState {
    v: StateSummary,
}

/// JSON-RPC client for a settlement network node.
#[derive(Debug)]
pub struct RpcChainClient {
    http_client: reqwest::Client,
    rpc_url: String,
    request_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .context("Failed to build RPC http client")?;

        Ok(Self {
            http_client,
            rpc_url: rpc_url.into(),
            request_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
        };

        debug!("[RPC] >>> {} {}", method, request.params);

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let rpc_response: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| RpcError::Decode(format!("{method}: {e}")))?;

        if let Some(error) = rpc_response.error {
            return Err(RpcError::from_message(format!(
                "{} returned error {}: {}",
                method, error.code, error.message
            )));
        }

        let result = rpc_response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn head(&self) -> Result<Value, RpcError> {
        let response: QueryBlockResponse = self
            .call("ren_queryBlock", json!({ "blockHeight": null }))
            .await?;
        Ok(response.block)
    }

    async fn blocks(&self, from: u64, count: u64) -> Result<Vec<Value>, RpcError> {
        let response: QueryBlocksResponse = self
            .call(
                "ren_queryBlocks",
                json!({ "blockHeight": from.to_string(), "n": count.to_string() }),
            )
            .await?;
        Ok(response.blocks)
    }

    async fn transaction(&self, hash: &str) -> Result<ChainTransaction, RpcError> {
        let response: QueryTxResponse = self.call("ren_queryTx", json!({ "txHash": hash })).await?;
        Ok(response.tx)
    }

    async fn state_summary(&self) -> Result<StateSummary, RpcError> {
        let response: QueryBlockStateResponse =
            self.call("ren_queryBlockState", json!({})).await?;
        Ok(response.state.v)
    }
}

fn transport_error(err: reqwest::Error) -> RpcError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RpcError::Transient(err.to_string())
    } else {
        RpcError::from_message(err.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> RpcError {
    let message = format!("node returned status {status}: {}", body.trim());
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            RpcError::Transient(message)
        }
        StatusCode::PAYLOAD_TOO_LARGE => RpcError::BatchTooLarge(message),
        StatusCode::NOT_FOUND => RpcError::NotFound(message),
        _ => RpcError::from_message(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_statuses_are_transient() {
        assert!(status_error(StatusCode::GATEWAY_TIMEOUT, "504 Gateway Time-out").is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_transient());
    }

    #[test]
    fn test_payload_too_large_shrinks_batch() {
        assert!(matches!(
            status_error(StatusCode::PAYLOAD_TOO_LARGE, ""),
            RpcError::BatchTooLarge(_)
        ));
    }

    #[test]
    fn test_missing_transaction_status() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "tx not found"),
            RpcError::NotFound(_)
        ));
    }

    #[test]
    fn test_block_state_unwraps_packed_value() {
        let response: QueryBlockStateResponse = serde_json::from_value(json!({
            "state": {
                "t": { "struct": [] },
                "v": { "BTC": { "minted": [{ "amount": "42", "chain": "Ethereum" }] } }
            }
        }))
        .unwrap();
        assert!(response.state.v.minted_on("BTC", "Ethereum").is_some());
    }
}
