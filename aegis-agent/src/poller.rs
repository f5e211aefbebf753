use std::sync::Arc;
use std::time::Duration;

use aegis_core::audit::PollState;
use aegis_core::config::PollerConfig;
use aegis_core::error::AuditError;
use aegis_core::wait::CancelSignal;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

/// Terminal outcome of waiting for the receiving contract's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Clearance {
    Approved,
    Denied { risk_score: U256 },
    Timeout { attempts: u32 },
    /// The caller gave up before the contract decided.
    Cancelled { attempts: u32 },
}

impl Clearance {
    pub fn is_approved(&self) -> bool {
        matches!(self, Clearance::Approved)
    }
}

/// Token-scoped clearance events from a known start block onward.
#[async_trait]
pub trait ClearanceLogSource: Send + Sync {
    async fn approved(&self, token: Address, from_block: u64) -> Result<bool, AuditError>;

    /// Risk score of the first denial, if any.
    async fn denied(&self, token: Address, from_block: u64) -> Result<Option<U256>, AuditError>;
}

/// Waits for the first approval or denial of a token.
///
/// Each attempt checks approvals, then denials; RPC failures are swallowed
/// and retried. A fired cancel signal ends the wait between attempts.
pub struct ClearancePoller {
    source: Arc<dyn ClearanceLogSource>,
    interval: Duration,
    max_attempts: u32,
}

impl ClearancePoller {
    pub fn new(source: Arc<dyn ClearanceLogSource>, interval: Duration, max_attempts: u32) -> Self {
        Self {
            source,
            interval,
            max_attempts,
        }
    }

    pub fn from_config(source: Arc<dyn ClearanceLogSource>, config: &PollerConfig) -> Self {
        Self::new(
            source,
            Duration::from_millis(config.interval_ms),
            config.max_attempts,
        )
    }

    pub async fn wait(&self, token: Address, start_block: u64, cancel: &CancelSignal) -> Clearance {
        let mut poll = PollState::new(
            self.max_attempts,
            u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
        );

        while poll.begin_attempt() {
            match self.check(token, start_block).await {
                Ok(Some(clearance)) => {
                    info!(%token, attempt = poll.attempts, ?clearance, "clearance observed");
                    return clearance;
                }
                Ok(None) => debug!(%token, attempt = poll.attempts, "no clearance yet"),
                Err(err) => debug!(%token, attempt = poll.attempts, error = %err, "clearance query failed"),
            }
            if !poll.is_exhausted() && cancel.sleep(poll.interval()).await.is_err() {
                info!(%token, attempts = poll.attempts, "clearance wait cancelled");
                return Clearance::Cancelled {
                    attempts: poll.attempts,
                };
            }
        }

        info!(%token, attempts = poll.attempts, "clearance wait timed out");
        Clearance::Timeout {
            attempts: poll.attempts,
        }
    }

    async fn check(&self, token: Address, start_block: u64) -> Result<Option<Clearance>, AuditError> {
        if self.source.approved(token, start_block).await? {
            return Ok(Some(Clearance::Approved));
        }
        Ok(self
            .source
            .denied(token, start_block)
            .await?
            .map(|risk_score| Clearance::Denied { risk_score }))
    }
}
