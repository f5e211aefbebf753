use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U64};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AuditError;
use crate::rpc::{
    JsonRpcId, JsonRpcRequest, JsonRpcResponse, LogFilter, RpcLog, TransactionReceipt,
    TransactionRequest,
};

const PROVIDER: &str = "json-rpc";

/// Minimal Ethereum JSON-RPC client over HTTP.
#[derive(Clone)]
pub struct ChainRpcClient {
    http: reqwest::Client,
    endpoint: String,
    next_id: Arc<AtomicI64>,
}

impl ChainRpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AuditError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AuditError::transport(endpoint, err.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            next_id: Arc::new(AtomicI64::new(1)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AuditError> {
        let id = JsonRpcId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: Some(params),
            id: Some(id.clone()),
        };
        debug!(endpoint = %self.endpoint, method, "json-rpc call");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| map_transport_error(err, &self.endpoint, method))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::upstream(
                PROVIDER,
                status.as_u16(),
                format!("{method}: {}", status.canonical_reason().unwrap_or("error")),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AuditError::transport(&self.endpoint, err.to_string()))?;

        let envelope: JsonRpcResponse = serde_json::from_slice(&body).map_err(|err| {
            AuditError::upstream(
                PROVIDER,
                status.as_u16(),
                format!(
                    "failed to parse response for '{method}': {err}. response={}",
                    truncate_debug(&String::from_utf8_lossy(&body), 2_000)
                ),
            )
        })?;

        if envelope.id != Some(id) {
            return Err(AuditError::upstream(
                PROVIDER,
                status.as_u16(),
                format!("mismatched response id for '{method}'"),
            ));
        }

        if let Some(err) = envelope.error {
            return Err(AuditError::upstream(
                PROVIDER,
                status.as_u16(),
                format!("rpc error {}: {}", err.code, err.message),
            ));
        }

        // A JSON `null` result is a valid answer (e.g. a pending receipt).
        Ok(envelope.result.unwrap_or(serde_json::Value::Null))
    }

    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, AuditError> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).map_err(|err| {
            AuditError::upstream(PROVIDER, 200, format!("invalid '{method}' result: {err}"))
        })
    }

    /// Deployed bytecode as `0x`-prefixed hex; `0x` for accounts without code.
    pub async fn get_code(&self, address: Address) -> Result<String, AuditError> {
        self.call_typed("eth_getCode", serde_json::json!([address, "latest"]))
            .await
    }

    pub async fn block_number(&self) -> Result<u64, AuditError> {
        let number: U64 = self.call_typed("eth_blockNumber", serde_json::json!([])).await?;
        Ok(number.to::<u64>())
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, AuditError> {
        self.call_typed("eth_getLogs", serde_json::json!([filter]))
            .await
    }

    /// Send through a node-managed account; signing stays with the node.
    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
    ) -> Result<B256, AuditError> {
        let tx = TransactionRequest {
            from,
            to,
            data: Bytes::from(data),
            value: U64::ZERO,
        };
        self.call_typed("eth_sendTransaction", serde_json::json!([tx]))
            .await
    }

    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, AuditError> {
        self.call_typed("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await
    }
}

fn map_transport_error(err: reqwest::Error, endpoint: &str, method: &str) -> AuditError {
    if err.is_timeout() {
        return AuditError::transport(endpoint, format!("'{method}' timed out"));
    }
    if err.is_connect() {
        return AuditError::transport(endpoint, format!("unable to connect for '{method}'"));
    }
    AuditError::transport(endpoint, err.to_string())
}

fn truncate_debug(value: &str, max_chars: usize) -> String {
    let char_count = value.chars().count();
    if char_count <= max_chars {
        return value.to_string();
    }
    let truncated: String = value.chars().take(max_chars).collect();
    format!("{}...(+{} chars)", truncated, char_count - max_chars)
}
