use alloy_primitives::{Address, hex};
use serde::{Deserialize, Serialize};

/// Where a contract's readable representation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceProvider {
    /// Verified source from the block explorer registry.
    #[serde(rename = "basescan", alias = "verified")]
    Verified,
    /// Best-effort pseudocode from the bytecode decompiler.
    #[serde(rename = "decompiled", alias = "dedaub")]
    Decompiled,
    #[serde(rename = "none")]
    None,
}

impl SourceProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceProvider::Verified => "basescan",
            SourceProvider::Decompiled => "decompiled",
            SourceProvider::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    pub source: String,
    pub contract_name: String,
    pub provider: SourceProvider,
    pub is_decompiled: bool,
}

impl SourceResult {
    pub fn verified(source: impl Into<String>, contract_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            contract_name: contract_name.into(),
            provider: SourceProvider::Verified,
            is_decompiled: false,
        }
    }

    pub fn decompiled(address: Address, source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            contract_name: decompiled_contract_name(address),
            provider: SourceProvider::Decompiled,
            is_decompiled: true,
        }
    }

    /// No readable source. The source text is always empty.
    pub fn none() -> Self {
        Self {
            source: String::new(),
            contract_name: String::new(),
            provider: SourceProvider::None,
            is_decompiled: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider != SourceProvider::None
    }

    pub fn provenance(&self) -> SourceProvenance {
        SourceProvenance {
            provider: self.provider,
            is_decompiled: self.is_decompiled,
        }
    }
}

/// Provenance threaded into detector input so lossy pseudocode is labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceProvenance {
    pub provider: SourceProvider,
    pub is_decompiled: bool,
}

/// `Decompiled_` followed by the first ten characters of the lowercase
/// `0x`-prefixed address.
pub fn decompiled_contract_name(address: Address) -> String {
    let hex = hex::encode_prefixed(address);
    format!("Decompiled_{}", &hex[..10])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_result_has_empty_source() {
        let result = SourceResult::none();
        assert_eq!(result.source, "");
        assert_eq!(result.provider, SourceProvider::None);
        assert!(!result.is_decompiled);
        assert!(!result.is_available());
    }

    #[test]
    fn decompiled_name_uses_address_prefix() {
        let address: Address = "0xdeadbeef00000000000000000000000000000000"
            .parse()
            .expect("address");
        let result = SourceResult::decompiled(address, "function transfer(...){...}");
        assert_eq!(result.contract_name, "Decompiled_0xdeadbeef");
        assert!(result.is_decompiled);
        assert_eq!(result.provider, SourceProvider::Decompiled);
    }

    #[test]
    fn provider_serializes_with_registry_names() {
        let json = serde_json::to_string(&SourceResult::verified("contract Foo{}", "Foo"))
            .expect("serialize");
        assert!(json.contains("\"provider\":\"basescan\""));
        assert!(json.contains("\"isDecompiled\":false"));

        let legacy: SourceProvider = serde_json::from_str("\"dedaub\"").expect("alias");
        assert_eq!(legacy, SourceProvider::Decompiled);
    }
}
