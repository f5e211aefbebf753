use std::time::Duration;

use aegis_core::error::AuditError;
use aegis_core::rpc_client::ChainRpcClient;
use alloy_primitives::Address;
use async_trait::async_trait;
use serde::Deserialize;

use crate::resolver::{BytecodeSource, VerifiedSource, VerifiedSourceProvider};

const PROVIDER: &str = "basescan";

/// Verified-source lookup against an Etherscan-family explorer API.
pub struct BaseScanSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ExplorerEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SourceEntry {
    #[serde(default)]
    source_code: String,
    #[serde(default)]
    contract_name: String,
}

impl BaseScanSource {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, AuditError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AuditError::transport(base_url, err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl VerifiedSourceProvider for BaseScanSource {
    async fn verified_source(&self, address: Address) -> Result<Option<VerifiedSource>, AuditError> {
        let url = format!("{}/api", self.base_url);
        let address = address.to_string();
        let response = self
            .http
            .get(&url)
            .query(&[
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|err| AuditError::transport(&url, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::upstream(
                PROVIDER,
                status.as_u16(),
                status.canonical_reason().unwrap_or("error"),
            ));
        }

        let envelope: ExplorerEnvelope = response.json().await.map_err(|err| {
            AuditError::upstream(PROVIDER, status.as_u16(), format!("invalid body: {err}"))
        })?;
        parse_source_response(envelope)
    }
}

fn parse_source_response(envelope: ExplorerEnvelope) -> Result<Option<VerifiedSource>, AuditError> {
    // The explorer reports "NOTOK" with a string result for rate limits and bad keys.
    if envelope.status != "1" {
        if envelope.result.is_array() {
            return Ok(None);
        }
        return Err(AuditError::upstream(
            PROVIDER,
            200,
            format!("{}: {}", envelope.message, envelope.result),
        ));
    }

    let entries: Vec<SourceEntry> = serde_json::from_value(envelope.result)
        .map_err(|err| AuditError::upstream(PROVIDER, 200, format!("invalid result: {err}")))?;

    Ok(entries
        .into_iter()
        .next()
        .filter(|entry| !entry.source_code.trim().is_empty())
        .map(|entry| VerifiedSource {
            source: entry.source_code,
            contract_name: entry.contract_name,
        }))
}

#[async_trait]
impl BytecodeSource for ChainRpcClient {
    async fn bytecode(&self, address: Address) -> Result<String, AuditError> {
        self.get_code(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: serde_json::Value) -> ExplorerEnvelope {
        serde_json::from_value(value).expect("envelope")
    }

    #[test]
    fn verified_contract_yields_source_and_name() {
        let found = parse_source_response(envelope(json!({
            "status": "1",
            "message": "OK",
            "result": [{ "SourceCode": "contract Foo{}", "ContractName": "Foo", "CompilerVersion": "v0.8.24" }]
        })))
        .expect("parsed");
        assert_eq!(
            found,
            Some(VerifiedSource {
                source: "contract Foo{}".to_string(),
                contract_name: "Foo".to_string(),
            })
        );
    }

    #[test]
    fn unverified_contract_has_empty_source_code() {
        let found = parse_source_response(envelope(json!({
            "status": "1",
            "message": "OK",
            "result": [{ "SourceCode": "", "ContractName": "" }]
        })))
        .expect("parsed");
        assert_eq!(found, None);
    }

    #[test]
    fn rate_limit_is_an_upstream_error() {
        let err = parse_source_response(envelope(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached"
        })))
        .expect_err("rate limited");
        assert!(matches!(err, AuditError::Upstream { .. }));
    }
}
