//! Fixed-width ABI encodings shared with the receiving contract.
//!
//! The verdict layout is `selector ‖ tradeId ‖ riskScore`, each value a
//! 32-byte big-endian word. The contract decodes these offsets directly.

use std::str::FromStr;

use alloy_primitives::{Address, B256, U256, hex, keccak256};
use serde::{Deserialize, Serialize};

use crate::error::CalldataError;

pub const SELECTOR_LEN: usize = 4;
pub const WORD_LEN: usize = 32;
/// Length of an encoded verdict report, selector excluded.
pub const REPORT_LEN: usize = 2 * WORD_LEN;
pub const VERDICT_CALLDATA_LEN: usize = SELECTOR_LEN + REPORT_LEN;

pub const REQUEST_AUDIT_SIGNATURE: &str = "requestAudit(address)";
pub const TRIGGER_SWAP_SIGNATURE: &str = "triggerSwap(address,uint256,uint256)";
pub const CLEARANCE_UPDATED_SIGNATURE: &str = "ClearanceUpdated(address,bool)";
pub const CLEARANCE_DENIED_SIGNATURE: &str = "ClearanceDenied(address,uint256)";

/// Versioned verdict wire protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitProtocol {
    /// `onReportDirect(uint256 tradeId, uint256 riskScore)`.
    #[default]
    V1,
}

impl CommitProtocol {
    pub fn signature(self) -> &'static str {
        match self {
            CommitProtocol::V1 => "onReportDirect(uint256,uint256)",
        }
    }

    pub fn selector(self) -> [u8; SELECTOR_LEN] {
        selector(self.signature())
    }

    /// Encode a verdict. Both values are in-domain by construction, so the
    /// output always has `VERDICT_CALLDATA_LEN` bytes.
    pub fn encode(self, trade_id: U256, risk_score: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(VERDICT_CALLDATA_LEN);
        out.extend_from_slice(&self.selector());
        out.extend_from_slice(&encode_report(trade_id, risk_score));
        out
    }

    pub fn decode(self, calldata: &[u8]) -> Result<(U256, u8), CalldataError> {
        if calldata.len() != VERDICT_CALLDATA_LEN {
            return Err(CalldataError::Length {
                expected: VERDICT_CALLDATA_LEN,
                actual: calldata.len(),
            });
        }
        let (head, body) = calldata.split_at(SELECTOR_LEN);
        if head != self.selector() {
            return Err(CalldataError::Selector(hex::encode(head)));
        }
        decode_report(body)
    }
}

/// The 64-byte `(uint256, uint256)` report body.
pub fn encode_report(trade_id: U256, risk_score: u8) -> [u8; REPORT_LEN] {
    let mut out = [0u8; REPORT_LEN];
    out[..WORD_LEN].copy_from_slice(&u256_word(trade_id));
    out[REPORT_LEN - 1] = risk_score;
    out
}

pub fn decode_report(body: &[u8]) -> Result<(U256, u8), CalldataError> {
    if body.len() != REPORT_LEN {
        return Err(CalldataError::Length {
            expected: REPORT_LEN,
            actual: body.len(),
        });
    }
    let trade_id = U256::from_be_slice(&body[..WORD_LEN]);
    let score_word = U256::from_be_slice(&body[WORD_LEN..]);
    let risk_score = u8::try_from(score_word)
        .map_err(|_| CalldataError::ScoreOutOfRange(score_word.to_string()))?;
    Ok((trade_id, risk_score))
}

/// Checked entry point for callers holding raw, untyped values.
pub fn encode_verdict_checked(
    protocol: CommitProtocol,
    trade_id: &str,
    risk_score: i64,
) -> Result<Vec<u8>, CalldataError> {
    let trade_id = parse_trade_id(trade_id)?;
    let risk_score = u8::try_from(risk_score)
        .map_err(|_| CalldataError::ScoreOutOfRange(risk_score.to_string()))?;
    Ok(protocol.encode(trade_id, risk_score))
}

/// Parse a decimal or `0x` hex trade id, rejecting anything above 2^256-1.
pub fn parse_trade_id(raw: &str) -> Result<U256, CalldataError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err(CalldataError::TradeIdOutOfRange(raw.to_string()));
    }
    U256::from_str(trimmed).map_err(|_| CalldataError::TradeIdOutOfRange(raw.to_string()))
}

pub fn selector(signature: &str) -> [u8; SELECTOR_LEN] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

pub fn u256_word(value: U256) -> [u8; WORD_LEN] {
    value.to_be_bytes::<WORD_LEN>()
}

pub fn address_word(address: Address) -> [u8; WORD_LEN] {
    let mut word = [0u8; WORD_LEN];
    word[WORD_LEN - 20..].copy_from_slice(address.as_slice());
    word
}

/// The indexed-address topic used to scope clearance events to a token.
pub fn address_topic(address: Address) -> B256 {
    B256::from(address_word(address))
}

pub fn request_audit_calldata(token: Address) -> Vec<u8> {
    let mut out = Vec::with_capacity(SELECTOR_LEN + WORD_LEN);
    out.extend_from_slice(&selector(REQUEST_AUDIT_SIGNATURE));
    out.extend_from_slice(&address_word(token));
    out
}

pub fn trigger_swap_calldata(token: Address, amount_in: U256, amount_out_minimum: U256) -> Vec<u8> {
    let mut out = Vec::with_capacity(SELECTOR_LEN + 3 * WORD_LEN);
    out.extend_from_slice(&selector(TRIGGER_SWAP_SIGNATURE));
    out.extend_from_slice(&address_word(token));
    out.extend_from_slice(&u256_word(amount_in));
    out.extend_from_slice(&u256_word(amount_out_minimum));
    out
}

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode_prefixed(bytes)
}

pub fn from_hex(raw: &str) -> Result<Vec<u8>, CalldataError> {
    hex::decode(raw).map_err(|err| CalldataError::Hex(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_42_score_5_layout() {
        let calldata = CommitProtocol::V1.encode(U256::from(42u64), 5);
        let encoded = to_hex(&calldata);

        assert_eq!(encoded.len(), 2 + 8 + 64 + 64);
        let trade_word = &encoded[10..74];
        let score_word = &encoded[74..];
        assert_eq!(trade_word, format!("{}2a", "0".repeat(62)));
        assert_eq!(score_word, format!("{}05", "0".repeat(62)));
        assert_eq!(&calldata[..4], &CommitProtocol::V1.selector());
    }

    #[test]
    fn length_is_constant_at_boundaries() {
        let zero = CommitProtocol::V1.encode(U256::ZERO, 0);
        let max = CommitProtocol::V1.encode(U256::MAX, u8::MAX);
        assert_eq!(zero.len(), VERDICT_CALLDATA_LEN);
        assert_eq!(max.len(), VERDICT_CALLDATA_LEN);
        assert!(max[4..36].iter().all(|b| *b == 0xff));
        assert_eq!(&max[36..67], &[0u8; 31]);
    }

    #[test]
    fn report_matches_uint256_pair_encoding() {
        let report = encode_report(U256::from(3u64), 0);
        let encoded = hex::encode(report);
        assert_eq!(encoded.len(), 128);
        assert_eq!(&encoded[..64], format!("{}3", "0".repeat(63)));
        assert_eq!(&encoded[64..], "0".repeat(64));

        let blocked = hex::encode(encode_report(U256::from(7u64), 255));
        assert!(blocked.ends_with(&format!("{}ff", "0".repeat(62))));
    }

    #[test]
    fn decode_reads_contract_offsets() {
        let mut calldata = CommitProtocol::V1.selector().to_vec();
        calldata.extend(from_hex(&format!("{}2a{}24", "0".repeat(62), "0".repeat(62))).expect("hex"));
        assert_eq!(
            CommitProtocol::V1.decode(&calldata),
            Ok((U256::from(42u64), 36))
        );
    }

    #[test]
    fn decode_rejects_wrong_selector_and_wide_score() {
        let mut calldata = CommitProtocol::V1.encode(U256::from(1u64), 1);
        calldata[0] ^= 0xff;
        assert!(matches!(
            CommitProtocol::V1.decode(&calldata),
            Err(CalldataError::Selector(_))
        ));

        let mut wide = CommitProtocol::V1.encode(U256::from(1u64), 1);
        wide[66] = 1;
        assert!(matches!(
            CommitProtocol::V1.decode(&wide),
            Err(CalldataError::ScoreOutOfRange(_))
        ));

        assert!(matches!(
            CommitProtocol::V1.decode(&wide[..10]),
            Err(CalldataError::Length { .. })
        ));
    }

    #[test]
    fn checked_encoding_fails_fast_out_of_domain() {
        assert!(matches!(
            encode_verdict_checked(CommitProtocol::V1, "1", -1),
            Err(CalldataError::ScoreOutOfRange(_))
        ));
        assert!(matches!(
            encode_verdict_checked(CommitProtocol::V1, "1", 256),
            Err(CalldataError::ScoreOutOfRange(_))
        ));
        let too_big = format!("{}0", U256::MAX);
        assert!(matches!(
            encode_verdict_checked(CommitProtocol::V1, &too_big, 0),
            Err(CalldataError::TradeIdOutOfRange(_))
        ));
        assert!(matches!(
            encode_verdict_checked(CommitProtocol::V1, "-5", 0),
            Err(CalldataError::TradeIdOutOfRange(_))
        ));

        let max = U256::MAX.to_string();
        let calldata = encode_verdict_checked(CommitProtocol::V1, &max, 255).expect("in domain");
        assert_eq!(calldata.len(), VERDICT_CALLDATA_LEN);
    }

    #[test]
    fn agent_calldata_uses_known_selectors() {
        // ERC-20 transfer(address,uint256) is a fixed reference point for the keccak selector.
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");

        let token = Address::repeat_byte(0xab);
        let request = request_audit_calldata(token);
        assert_eq!(request.len(), 36);
        assert_eq!(&request[4..16], &[0u8; 12]);
        assert_eq!(&request[16..], token.as_slice());

        let swap = trigger_swap_calldata(token, U256::from(10u64), U256::from(1u64));
        assert_eq!(swap.len(), 4 + 96);
        assert_eq!(swap[swap.len() - 1], 1);
    }

    #[test]
    fn address_topic_left_pads() {
        let token = Address::repeat_byte(0x01);
        let topic = address_topic(token);
        assert_eq!(&topic[..12], &[0u8; 12]);
        assert_eq!(&topic[12..], token.as_slice());
    }
}
