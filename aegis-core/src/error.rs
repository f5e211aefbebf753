use alloy_primitives::U256;

/// Failure taxonomy shared by every collaborator of the audit pipeline.
///
/// `Timeout` means a collaborator never answered within the attempt budget;
/// `Upstream` means it answered and said no. Callers rely on the distinction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("invalid input: {reason}")]
    Input { reason: String },

    #[error("transport error reaching {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{provider} returned status {status}: {reason}")]
    Upstream {
        provider: String,
        status: u16,
        reason: String,
    },

    #[error("{operation} timed out after {attempts} attempts")]
    Timeout { operation: String, attempts: u32 },

    #[error("pipeline fault: {reason}")]
    Pipeline { reason: String },

    #[error("trade {trade_id} already has a committed verdict")]
    DuplicateCommit { trade_id: U256 },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },
}

impl AuditError {
    pub fn input(reason: impl Into<String>) -> Self {
        Self::Input {
            reason: reason.into(),
        }
    }

    pub fn transport(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn upstream(provider: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            status,
            reason: reason.into(),
        }
    }

    pub fn pipeline(reason: impl Into<String>) -> Self {
        Self::Pipeline {
            reason: reason.into(),
        }
    }

    /// Numeric status carried alongside the error. Transport failures have
    /// no HTTP exchange and report 0.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Input { .. } => 400,
            Self::Transport { .. } => 0,
            Self::Upstream { status, .. } => *status,
            Self::Timeout { .. } => 408,
            Self::DuplicateCommit { .. } => 409,
            Self::Pipeline { .. } => 500,
            Self::Cancelled { .. } => 499,
        }
    }

    /// Whether a documented polling loop may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalldataError {
    #[error("expected {expected} bytes of calldata, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("unknown selector 0x{0}")]
    Selector(String),

    #[error("risk score {0} outside uint8 range")]
    ScoreOutOfRange(String),

    #[error("trade id '{0}' is not a uint256")]
    TradeIdOutOfRange(String),

    #[error("invalid hex: {0}")]
    Hex(String),
}
