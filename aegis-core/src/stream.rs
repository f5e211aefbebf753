use serde::{Deserialize, Serialize};

use crate::audit::RiskVerdict;
use crate::risk::DetectorFamily;

/// Version of the progress-event vocabulary below.
pub const STREAM_PROTOCOL_VERSION: u32 = 1;

/// Pipeline phases reported on the progress stream, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    ResolveSource,
    StaticAnalysis,
    AiConsensus,
    ComputeRiskCode,
    CommitVerdict,
}

impl AuditPhase {
    pub fn label(self) -> &'static str {
        match self {
            AuditPhase::ResolveSource => "Fetching contract source",
            AuditPhase::StaticAnalysis => "Running static analysis",
            AuditPhase::AiConsensus => "Running AI consensus",
            AuditPhase::ComputeRiskCode => "Computing final risk code",
            AuditPhase::CommitVerdict => "Committing verdict on-chain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Running,
    Done,
    Error,
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PhaseStatus::Running)
    }
}

/// One tagged record on the server-to-client progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuditEvent {
    Phase {
        phase: AuditPhase,
        label: String,
        status: PhaseStatus,
    },
    DetectorStarted {
        detector: String,
        family: DetectorFamily,
    },
    DetectorReasoningStart {
        detector: String,
    },
    /// A fragment of the model's answer, in arrival order.
    DetectorReasoningChunk {
        detector: String,
        text: String,
    },
    DetectorScore {
        detector: String,
        bits: u8,
    },
    /// Non-fatal: the detector's bits degrade to "not triggered".
    DetectorError {
        detector: String,
        message: String,
    },
    TransactionSubmitted {
        hash: String,
    },
    TransactionConfirmed {
        hash: String,
        block_number: Option<u64>,
        success: bool,
    },
    FinalVerdict {
        verdict: RiskVerdict,
    },
    FatalError {
        message: String,
    },
}

impl AuditEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuditEvent::FinalVerdict { .. } | AuditEvent::FatalError { .. }
        )
    }
}

/// How a consumer should read a finished (or closed) stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Verdict(RiskVerdict),
    Fatal(String),
    /// The stream closed without a terminal record.
    Aborted,
}

impl StreamOutcome {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a AuditEvent>) -> Self {
        for event in events {
            match event {
                AuditEvent::FinalVerdict { verdict } => return Self::Verdict(verdict.clone()),
                AuditEvent::FatalError { message } => return Self::Fatal(message.clone()),
                _ => {}
            }
        }
        Self::Aborted
    }
}
