use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use aegis_core::config::AegisConfig;
use alloy_primitives::Address;
use anyhow::{Context, Result, bail};

/// Load and deserialize config from a TOML file.
pub fn load_config(path: &Path) -> Result<AegisConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config: AegisConfig =
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))?;
    Ok(config)
}

/// Validate config for internal consistency:
/// - addresses parse and the commit path has a sender
/// - every attempt budget and interval is positive
/// - model slot names are unique
pub fn validate_config(config: &AegisConfig) -> Result<()> {
    if config.global.instance_id.trim().is_empty() {
        bail!("global.instance_id must not be empty");
    }

    config
        .api
        .bind_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("api.bind_addr '{}' is not a socket address", config.api.bind_addr))?;

    if config.chain.rpc_url.trim().is_empty() {
        bail!("chain.rpc_url must not be empty");
    }
    let module = parse_address("chain.module_address", &config.chain.module_address)?;
    if module == Address::ZERO {
        bail!("chain.module_address must not be the zero address");
    }

    match config.chain.committer_address.as_deref() {
        Some(raw) => {
            parse_address("chain.committer_address", raw)?;
        }
        None if config.pipeline.commit_enabled => {
            bail!("pipeline.commit_enabled requires chain.committer_address");
        }
        None => {}
    }

    for (field, value) in [
        ("chain.rpc_timeout_ms", config.chain.rpc_timeout_ms),
        ("decompiler.poll_interval_ms", config.decompiler.poll_interval_ms),
        ("detectors.detector_timeout_ms", config.detectors.detector_timeout_ms),
        ("pipeline.source_timeout_ms", config.pipeline.source_timeout_ms),
        ("poller.interval_ms", config.poller.interval_ms),
    ] {
        if value == 0 {
            bail!("{field} must be positive");
        }
    }

    for (field, value) in [
        ("decompiler.max_poll_attempts", config.decompiler.max_poll_attempts),
        ("pipeline.confirm_attempts", config.pipeline.confirm_attempts),
        ("poller.max_attempts", config.poller.max_attempts),
    ] {
        if value == 0 {
            bail!("{field} must be at least 1");
        }
    }

    if config.decompiler.max_output_chars == 0 {
        bail!("decompiler.max_output_chars must be at least 1");
    }

    let threshold = config.detectors.sell_tax_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        bail!("detectors.sell_tax_threshold {threshold} must be a fraction in [0, 1]");
    }

    let mut names = HashSet::new();
    for slot in &config.detectors.models {
        if slot.name.trim().is_empty() {
            bail!("detector model slot with model '{}' has an empty name", slot.model);
        }
        if !names.insert(slot.name.as_str()) {
            bail!("detector model '{}' is defined twice", slot.name);
        }
        if slot.provider != "mock" && slot.model.trim().is_empty() {
            bail!("detector model '{}' has no model id", slot.name);
        }
    }

    Ok(())
}

fn parse_address(field: &str, raw: &str) -> Result<Address> {
    raw.trim()
        .parse()
        .with_context(|| format!("{field} '{raw}' is not an address"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        [global]
        instance_id = "aegis-test"

        [chain]
        rpc_url = "http://127.0.0.1:8545"
        module_address = "0x1234567890123456789012345678901234567890"
        committer_address = "0x00000000000000000000000000000000000000aa"
    "#;

    fn parse(extra: &str) -> AegisConfig {
        toml::from_str(&format!("{BASE}\n{extra}")).expect("config should parse")
    }

    #[test]
    fn minimal_config_is_valid() {
        validate_config(&parse("")).expect("valid");
    }

    #[test]
    fn commit_without_sender_is_rejected() {
        let mut config = parse("");
        config.chain.committer_address = None;
        let err = validate_config(&config).expect_err("commit needs a sender");
        assert!(err.to_string().contains("committer_address"));

        config.pipeline.commit_enabled = false;
        validate_config(&config).expect("read-only oracle needs no sender");
    }

    #[test]
    fn malformed_module_address_is_rejected() {
        let mut config = parse("");
        config.chain.module_address = "0x1234".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn duplicate_model_names_are_rejected() {
        let config = parse(
            r#"
            [[detectors.models]]
            name = "Llama-3"
            provider = "groq"
            model = "llama-3.3-70b-versatile"

            [[detectors.models]]
            name = "Llama-3"
            provider = "mock"
            model = ""
            "#,
        );
        let err = validate_config(&config).expect_err("duplicate");
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn sell_tax_threshold_must_be_a_fraction() {
        let config = parse("[detectors]\nsell_tax_threshold = 10.0\n");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn zero_attempt_budget_is_rejected() {
        let config = parse("[poller]\nmax_attempts = 0\n");
        let err = validate_config(&config).expect_err("zero budget");
        assert!(err.to_string().contains("poller.max_attempts"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_config(Path::new("/nonexistent/aegis.toml")).expect_err("missing");
        assert!(err.to_string().contains("/nonexistent/aegis.toml"));
    }
}
