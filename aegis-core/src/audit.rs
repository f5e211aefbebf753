use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::risk::{RiskCheck, RiskMask, VerdictStatus, interpret_score, summarize};

/// An agent's request to audit a token before trading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub trade_id: U256,
    pub target_token: Address,
    #[serde(default)]
    pub start_block: u64,
}

/// Final verdict of one audit. Produced once per trade id.
///
/// `risk_score == 0` exactly when `status == Approved`. Error verdicts carry
/// 255 so they fail closed; they are never encoded for the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskVerdict {
    pub trade_id: U256,
    pub target_token: Address,
    pub risk_score: u8,
    pub status: VerdictStatus,
    pub reasoning: String,
    pub checks: Vec<RiskCheck>,
    pub decided_at: DateTime<Utc>,
}

impl RiskVerdict {
    pub fn from_mask(request: &AuditRequest, mask: RiskMask) -> Self {
        let status = if mask.is_clean() {
            VerdictStatus::Approved
        } else {
            VerdictStatus::Blocked
        };
        Self {
            trade_id: request.trade_id,
            target_token: request.target_token,
            risk_score: mask.bits(),
            status,
            reasoning: summarize(mask),
            checks: mask.checks(),
            decided_at: Utc::now(),
        }
    }

    /// Map a raw intermediate score. Anything outside 0..=255 becomes an
    /// error verdict instead of a risk code.
    pub fn from_raw_score(request: &AuditRequest, score: i64) -> Self {
        match (interpret_score(score), u8::try_from(score)) {
            (VerdictStatus::Error, _) | (_, Err(_)) => {
                Self::error(request, format!("internal score {score} is not a risk code"))
            }
            (_, Ok(bits)) => Self::from_mask(request, RiskMask::new(bits)),
        }
    }

    pub fn error(request: &AuditRequest, reason: impl Into<String>) -> Self {
        Self {
            trade_id: request.trade_id,
            target_token: request.target_token,
            risk_score: u8::MAX,
            status: VerdictStatus::Error,
            reasoning: reason.into(),
            checks: RiskMask::CLEAN.checks(),
            decided_at: Utc::now(),
        }
    }

    pub fn mask(&self) -> RiskMask {
        RiskMask::new(self.risk_score)
    }

    pub fn is_committable(&self) -> bool {
        self.status != VerdictStatus::Error
    }
}

/// Attempt accounting for the bounded polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl PollState {
    pub fn new(max_attempts: u32, interval_ms: u64) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            interval_ms,
        }
    }

    /// Consume one attempt. Returns `false` once the budget is spent.
    pub fn begin_attempt(&mut self) -> bool {
        if self.attempts >= self.max_attempts {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AuditRequest {
        AuditRequest {
            trade_id: U256::from(7u64),
            target_token: Address::repeat_byte(0x11),
            start_block: 100,
        }
    }

    #[test]
    fn zero_score_is_the_only_approval() {
        let approved = RiskVerdict::from_raw_score(&request(), 0);
        assert_eq!(approved.status, VerdictStatus::Approved);
        assert_eq!(approved.risk_score, 0);

        let blocked = RiskVerdict::from_raw_score(&request(), 4);
        assert_eq!(blocked.status, VerdictStatus::Blocked);
        assert!(blocked.checks[2].triggered);
        assert!(blocked.is_committable());
    }

    #[test]
    fn negative_score_never_becomes_a_risk_code() {
        let verdict = RiskVerdict::from_raw_score(&request(), -1);
        assert_eq!(verdict.status, VerdictStatus::Error);
        assert_ne!(verdict.risk_score, 0);
        assert!(!verdict.is_committable());

        let overflow = RiskVerdict::from_raw_score(&request(), 300);
        assert_eq!(overflow.status, VerdictStatus::Error);
    }

    #[test]
    fn poll_state_never_exceeds_budget() {
        let mut state = PollState::new(3, 1000);
        assert!(state.begin_attempt());
        assert!(state.begin_attempt());
        assert!(state.begin_attempt());
        assert!(!state.begin_attempt());
        assert_eq!(state.attempts, 3);
        assert!(state.is_exhausted());
    }

    #[test]
    fn verdict_serializes_camel_case() {
        let verdict = RiskVerdict::from_mask(&request(), RiskMask::new(36));
        let value = serde_json::to_value(&verdict).expect("serialize");
        assert_eq!(value["riskScore"], 36);
        assert_eq!(value["status"], "BLOCKED");
        assert_eq!(value["checks"].as_array().map(Vec::len), Some(8));
    }
}
