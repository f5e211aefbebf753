use std::sync::Arc;
use std::time::Duration;

use aegis_core::config::{AegisConfig, ModelSlotConfig};
use aegis_core::rpc_client::ChainRpcClient;
use aegis_oracle::basescan::BaseScanSource;
use aegis_oracle::committer::{JsonRpcWriter, VerdictCommitter};
use aegis_oracle::decompiler::{DecompilerClient, DecompilerSettings, HttpDecompilerTransport};
use aegis_oracle::detectors::{AiDetector, GoPlusSecurity, MockModelClient, ModelClient, RigModelClient};
use aegis_oracle::log::{AuditLog, TracingLog};
use aegis_oracle::{AuditPipeline, RiskDetectorAggregator, SourceResolver};
use anyhow::{Context, Result, anyhow, bail};
use rig::client::CompletionClient;
use tracing::{info, warn};

/// Assemble the audit pipeline and its live adapters from config.
pub fn build_pipeline(config: &AegisConfig) -> Result<AuditPipeline> {
    let timeout = Duration::from_millis(config.chain.rpc_timeout_ms);
    let chain = ChainRpcClient::new(&config.chain.rpc_url, timeout)
        .with_context(|| format!("chain rpc client for {}", config.chain.rpc_url))?;
    let log: Arc<dyn AuditLog> = Arc::new(TracingLog);

    let verified = BaseScanSource::new(
        &config.verified_source.base_url,
        optional_key(&config.verified_source.api_key_env),
        timeout,
    )?;

    let transport = HttpDecompilerTransport::new(
        &config.decompiler.base_url,
        optional_key(&config.decompiler.api_key_env),
        timeout,
    )?;
    let decompiler = DecompilerClient::new(
        Arc::new(transport),
        DecompilerSettings::from(&config.decompiler),
    )
    .with_log(log.clone());

    let resolver = SourceResolver::new(
        Arc::new(verified),
        Arc::new(chain.clone()),
        Arc::new(decompiler),
    )
    .with_log(log);

    let security = GoPlusSecurity::new(
        &config.token_security.base_url,
        config.chain.chain_id,
        timeout,
    )?;

    let models = config
        .detectors
        .models
        .iter()
        .map(|slot| build_model_client(slot).map(|client| AiDetector::new(&slot.name, client)))
        .collect::<Result<Vec<_>>>()?;
    if models.is_empty() {
        warn!("no AI models configured; only static checks will run");
    }
    info!(
        models = models.len(),
        strict_consensus = config.detectors.strict_consensus,
        "detectors configured"
    );

    let aggregator = RiskDetectorAggregator::new(Arc::new(security), models, &config.detectors);
    let pipeline = AuditPipeline::new(
        resolver,
        aggregator,
        Duration::from_millis(config.pipeline.source_timeout_ms),
    );

    if !config.pipeline.commit_enabled {
        info!("verdict commits disabled");
        return Ok(pipeline);
    }

    let from = config
        .chain
        .committer_address
        .as_deref()
        .context("pipeline.commit_enabled requires chain.committer_address")?
        .trim()
        .parse()
        .context("chain.committer_address")?;
    let to = config
        .chain
        .module_address
        .trim()
        .parse()
        .context("chain.module_address")?;

    let committer = VerdictCommitter::new(
        Arc::new(JsonRpcWriter::new(chain, from, to)),
        config.chain.protocol,
        config.pipeline.confirm_attempts,
    );
    info!(module = %to, sender = %from, protocol = ?config.chain.protocol, "verdict commits enabled");
    Ok(pipeline.with_committer(Arc::new(committer)))
}

/// Build the completion client behind one AI model slot.
pub fn build_model_client(slot: &ModelSlotConfig) -> Result<Arc<dyn ModelClient>> {
    match slot.provider.as_str() {
        "mock" => Ok(Arc::new(MockModelClient::flagging(
            &[],
            "mock model reports no findings",
        ))),
        provider => {
            let env_var = resolve_api_key_env_var(provider);
            let key = std::env::var(&env_var).map_err(|_| {
                anyhow!("{env_var} is required when using provider='{provider}'")
            })?;

            let base_url = slot
                .base_url
                .as_deref()
                .or_else(|| default_base_url(provider));

            let client: Result<rig::providers::openai::CompletionsClient, _> =
                if let Some(url) = base_url {
                    rig::providers::openai::CompletionsClient::builder()
                        .api_key(&key)
                        .base_url(url)
                        .build()
                } else if provider == "openai" {
                    rig::providers::openai::CompletionsClient::new(&key)
                } else {
                    bail!("provider '{provider}' requires a base_url in config");
                };
            let client = client
                .map_err(|e| anyhow!("failed to create client for model '{}': {e}", slot.name))?;

            Ok(Arc::new(RigModelClient::new(
                client.completion_model(&slot.model),
                provider,
            )))
        }
    }
}

fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "groq" => Some("https://api.groq.com/openai/v1"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1"),
        "xai" => Some("https://api.x.ai/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        _ => None,
    }
}

fn resolve_api_key_env_var(provider: &str) -> String {
    match provider {
        "openai" => "OPENAI_API_KEY".into(),
        "groq" => "GROQ_API_KEY".into(),
        "fireworks" => "FIREWORKS_API_KEY".into(),
        "xai" => "XAI_API_KEY".into(),
        "mistral" => "MISTRAL_API_KEY".into(),
        "together" => "TOGETHER_API_KEY".into(),
        other => format!("{}_API_KEY", other.to_ascii_uppercase().replace('-', "_")),
    }
}

/// Data-source keys are optional; the free tiers answer without one.
fn optional_key(env_var: &str) -> String {
    std::env::var(env_var).unwrap_or_else(|_| {
        warn!(env_var, "API key not set, continuing without one");
        String::new()
    })
}
