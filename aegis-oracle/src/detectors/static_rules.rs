use std::time::Duration;

use aegis_core::error::AuditError;
use aegis_core::risk::{RiskBit, RiskMask};
use aegis_core::source::SourceResult;
use alloy_primitives::Address;
use async_trait::async_trait;
use serde::Deserialize;

const PROVIDER: &str = "goplus";

/// Storage slot an ERC-1967 proxy keeps its implementation address in.
const EIP1967_IMPLEMENTATION_SLOT: &str =
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc";

/// What the token-security service knows about a token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenSecurityReport {
    pub is_open_source: bool,
    pub is_honeypot: bool,
    pub is_proxy: bool,
    /// Fraction, 0.10 meaning ten percent.
    pub sell_tax: f64,
    pub buy_tax: f64,
}

#[async_trait]
pub trait TokenSecurityProvider: Send + Sync {
    async fn token_security(&self, token: Address) -> Result<TokenSecurityReport, AuditError>;
}

pub struct GoPlusSecurity {
    http: reqwest::Client,
    base_url: String,
    chain_id: u64,
}

#[derive(Debug, Deserialize)]
struct GoPlusEnvelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: std::collections::HashMap<String, GoPlusToken>,
}

/// GoPlus encodes flags and rates as strings ("1", "0", "0.05").
#[derive(Debug, Default, Deserialize)]
struct GoPlusToken {
    #[serde(default)]
    is_open_source: Option<String>,
    #[serde(default)]
    is_honeypot: Option<String>,
    #[serde(default)]
    is_proxy: Option<String>,
    #[serde(default)]
    sell_tax: Option<String>,
    #[serde(default)]
    buy_tax: Option<String>,
}

impl GoPlusSecurity {
    pub fn new(base_url: &str, chain_id: u64, timeout: Duration) -> Result<Self, AuditError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AuditError::transport(base_url, err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain_id,
        })
    }
}

#[async_trait]
impl TokenSecurityProvider for GoPlusSecurity {
    async fn token_security(&self, token: Address) -> Result<TokenSecurityReport, AuditError> {
        let url = format!("{}/api/v1/token_security/{}", self.base_url, self.chain_id);
        let response = self
            .http
            .get(&url)
            .query(&[("contract_addresses", token.to_string())])
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
        let envelope: GoPlusEnvelope = response.json().await.map_err(|err| {
            AuditError::upstream(PROVIDER, status.as_u16(), format!("invalid body: {err}"))
        })?;
        parse_report(token, envelope)
    }
}

fn parse_report(token: Address, envelope: GoPlusEnvelope) -> Result<TokenSecurityReport, AuditError> {
    if envelope.code != 1 {
        return Err(AuditError::upstream(
            PROVIDER,
            200,
            format!("code {}: {}", envelope.code, envelope.message),
        ));
    }
    let key = token.to_string().to_lowercase();
    let entry = envelope
        .result
        .into_iter()
        .find(|(address, _)| address.to_lowercase() == key)
        .map(|(_, entry)| entry)
        .ok_or_else(|| AuditError::upstream(PROVIDER, 200, format!("{token} not indexed")))?;

    Ok(TokenSecurityReport {
        is_open_source: flag(&entry.is_open_source),
        is_honeypot: flag(&entry.is_honeypot),
        is_proxy: flag(&entry.is_proxy),
        sell_tax: rate(&entry.sell_tax),
        buy_tax: rate(&entry.buy_tax),
    })
}

fn flag(value: &Option<String>) -> bool {
    value.as_deref() == Some("1")
}

fn rate(value: &Option<String>) -> f64 {
    value
        .as_deref()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Deterministic rules behind bits 0 through 3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticRules {
    pub sell_tax_threshold: f64,
}

impl StaticRules {
    pub fn new(sell_tax_threshold: f64) -> Self {
        Self { sell_tax_threshold }
    }

    /// `report` is `None` when the security lookup failed; its bits then stay clear.
    pub fn evaluate(&self, report: Option<&TokenSecurityReport>, source: &SourceResult) -> RiskMask {
        let mut mask = RiskMask::CLEAN;
        mask.set(RiskBit::UnverifiedCode, !source.is_available());

        if let Some(report) = report {
            mask.set(
                RiskBit::SellRestriction,
                report.sell_tax > self.sell_tax_threshold,
            );
            mask.set(RiskBit::KnownHoneypot, report.is_honeypot);
            mask.set(RiskBit::UpgradeableProxy, report.is_proxy);
        }
        if has_proxy_slot(&source.source) {
            mask.set(RiskBit::UpgradeableProxy, true);
        }
        mask
    }
}

fn has_proxy_slot(source: &str) -> bool {
    source.to_ascii_lowercase().contains(EIP1967_IMPLEMENTATION_SLOT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token() -> Address {
        "0x00000000000000000000000000000000000000aa"
            .parse()
            .expect("address")
    }

    #[test]
    fn goplus_strings_are_decoded() {
        let envelope: GoPlusEnvelope = serde_json::from_value(json!({
            "code": 1,
            "message": "OK",
            "result": {
                "0x00000000000000000000000000000000000000aa": {
                    "is_open_source": "1",
                    "is_honeypot": "1",
                    "is_proxy": "0",
                    "sell_tax": "0.25",
                    "buy_tax": ""
                }
            }
        }))
        .expect("envelope");

        let report = parse_report(token(), envelope).expect("report");
        assert!(report.is_open_source);
        assert!(report.is_honeypot);
        assert!(!report.is_proxy);
        assert_eq!(report.sell_tax, 0.25);
        assert_eq!(report.buy_tax, 0.0);
    }

    #[test]
    fn unindexed_token_is_an_upstream_error() {
        let envelope: GoPlusEnvelope =
            serde_json::from_value(json!({ "code": 1, "message": "OK", "result": {} }))
                .expect("envelope");
        assert!(matches!(
            parse_report(token(), envelope),
            Err(AuditError::Upstream { .. })
        ));
    }

    #[test]
    fn honeypot_report_sets_bit_two() {
        let rules = StaticRules::new(0.10);
        let report = TokenSecurityReport {
            is_honeypot: true,
            ..TokenSecurityReport::default()
        };
        let mask = rules.evaluate(Some(&report), &SourceResult::verified("contract T{}", "T"));
        assert_eq!(mask.bits(), 4);
    }

    #[test]
    fn sell_tax_must_exceed_threshold() {
        let rules = StaticRules::new(0.10);
        let source = SourceResult::verified("contract T{}", "T");
        let at = TokenSecurityReport {
            sell_tax: 0.10,
            ..TokenSecurityReport::default()
        };
        let above = TokenSecurityReport {
            sell_tax: 0.11,
            ..TokenSecurityReport::default()
        };
        assert!(rules.evaluate(Some(&at), &source).is_clean());
        assert!(rules.evaluate(Some(&above), &source).contains(RiskBit::SellRestriction));
    }

    #[test]
    fn missing_source_sets_unverified_bit_even_without_report() {
        let mask = StaticRules::new(0.10).evaluate(None, &SourceResult::none());
        assert_eq!(mask.bits(), 1);
    }

    #[test]
    fn proxy_slot_in_source_sets_proxy_bit() {
        let source = SourceResult::verified(
            "bytes32 internal constant _IMPL = 0x360894A13BA1A3210667C828492DB98DCA3E2076CC3735A920A3CA505D382BBC;",
            "Proxy",
        );
        let mask = StaticRules::new(0.10).evaluate(None, &source);
        assert!(mask.contains(RiskBit::UpgradeableProxy));
    }
}
