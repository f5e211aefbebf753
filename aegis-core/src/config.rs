use serde::{Deserialize, Serialize};

use crate::calldata::CommitProtocol;

/// Top-level Aegis configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AegisConfig {
    pub global: GlobalConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub verified_source: VerifiedSourceConfig,
    #[serde(default)]
    pub decompiler: DecompilerConfig,
    #[serde(default)]
    pub token_security: TokenSecurityConfig,
    #[serde(default)]
    pub detectors: DetectorsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub poller: PollerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OtelConfig {
    pub service_name: Option<String>,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:9340".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Receiving contract for verdict commits and clearance events.
    pub module_address: String,
    /// Node-managed account that sends the verdict transaction.
    #[serde(default)]
    pub committer_address: Option<String>,
    #[serde(default)]
    pub protocol: CommitProtocol,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_chain_id() -> u64 {
    8453
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifiedSourceConfig {
    #[serde(default = "default_basescan_url")]
    pub base_url: String,
    #[serde(default = "default_basescan_key_env")]
    pub api_key_env: String,
}

impl Default for VerifiedSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_basescan_url(),
            api_key_env: default_basescan_key_env(),
        }
    }
}

fn default_basescan_url() -> String {
    "https://api.basescan.org".to_string()
}

fn default_basescan_key_env() -> String {
    "BASESCAN_API_KEY".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecompilerConfig {
    #[serde(default = "default_decompiler_url")]
    pub base_url: String,
    #[serde(default = "default_decompiler_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_decompiler_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_decompiler_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            base_url: default_decompiler_url(),
            api_key_env: default_decompiler_key_env(),
            poll_interval_ms: default_decompiler_poll_interval_ms(),
            max_poll_attempts: default_decompiler_max_poll_attempts(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

fn default_decompiler_url() -> String {
    "https://api.dedaub.com".to_string()
}

fn default_decompiler_key_env() -> String {
    "DEDAUB_API_KEY".to_string()
}

fn default_decompiler_poll_interval_ms() -> u64 {
    3_000
}

fn default_decompiler_max_poll_attempts() -> u32 {
    10
}

fn default_max_output_chars() -> usize {
    15_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenSecurityConfig {
    #[serde(default = "default_goplus_url")]
    pub base_url: String,
}

impl Default for TokenSecurityConfig {
    fn default() -> Self {
        Self {
            base_url: default_goplus_url(),
        }
    }
}

fn default_goplus_url() -> String {
    "https://api.gopluslabs.io".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorsConfig {
    /// Sell tax fraction above which the sell-restriction bit fires.
    #[serde(default = "default_sell_tax_threshold")]
    pub sell_tax_threshold: f64,
    /// AI bits fire only when every participating model flags them.
    #[serde(default)]
    pub strict_consensus: bool,
    #[serde(default = "default_detector_timeout_ms")]
    pub detector_timeout_ms: u64,
    #[serde(default)]
    pub models: Vec<ModelSlotConfig>,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            sell_tax_threshold: default_sell_tax_threshold(),
            strict_consensus: false,
            detector_timeout_ms: default_detector_timeout_ms(),
            models: Vec::new(),
        }
    }
}

fn default_sell_tax_threshold() -> f64 {
    0.10
}

fn default_detector_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSlotConfig {
    /// Display name on the progress stream, e.g. "OpenAI GPT-4o".
    pub name: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Upper bound on the whole source-resolution step, decompiler polling included.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub commit_enabled: bool,
    #[serde(default = "default_confirm_attempts")]
    pub confirm_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            commit_enabled: true,
            confirm_attempts: default_confirm_attempts(),
        }
    }
}

fn default_source_timeout_ms() -> u64 {
    45_000
}

fn default_confirm_attempts() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollerConfig {
    #[serde(default = "default_poller_interval_ms")]
    pub interval_ms: u64,
    /// At a one-second cadence the default tolerates two minutes of consensus latency.
    #[serde(default = "default_poller_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poller_interval_ms(),
            max_attempts: default_poller_max_attempts(),
        }
    }
}

fn default_poller_interval_ms() -> u64 {
    1_000
}

fn default_poller_max_attempts() -> u32 {
    120
}
