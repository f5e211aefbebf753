use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// One bit of the 8-bit risk code committed on-chain.
///
/// Bit positions are fixed by the receiving contract and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBit {
    UnverifiedCode,
    SellRestriction,
    KnownHoneypot,
    UpgradeableProxy,
    ObfuscatedTax,
    PrivilegeEscalation,
    ExternalCallRisk,
    LogicBomb,
}

/// Which detector family owns a bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorFamily {
    Static,
    Ai,
}

impl RiskBit {
    pub const ALL: [RiskBit; 8] = [
        RiskBit::UnverifiedCode,
        RiskBit::SellRestriction,
        RiskBit::KnownHoneypot,
        RiskBit::UpgradeableProxy,
        RiskBit::ObfuscatedTax,
        RiskBit::PrivilegeEscalation,
        RiskBit::ExternalCallRisk,
        RiskBit::LogicBomb,
    ];

    pub const AI: [RiskBit; 4] = [
        RiskBit::ObfuscatedTax,
        RiskBit::PrivilegeEscalation,
        RiskBit::ExternalCallRisk,
        RiskBit::LogicBomb,
    ];

    pub fn index(self) -> u8 {
        match self {
            RiskBit::UnverifiedCode => 0,
            RiskBit::SellRestriction => 1,
            RiskBit::KnownHoneypot => 2,
            RiskBit::UpgradeableProxy => 3,
            RiskBit::ObfuscatedTax => 4,
            RiskBit::PrivilegeEscalation => 5,
            RiskBit::ExternalCallRisk => 6,
            RiskBit::LogicBomb => 7,
        }
    }

    pub fn mask(self) -> u8 {
        1 << self.index()
    }

    /// Display name used in the checks list and the progress stream.
    pub fn label(self) -> &'static str {
        match self {
            RiskBit::UnverifiedCode => "Unverified Code",
            RiskBit::SellRestriction => "Sell Restriction",
            RiskBit::KnownHoneypot => "Known Honeypot",
            RiskBit::UpgradeableProxy => "Upgradeable Proxy",
            RiskBit::ObfuscatedTax => "Obfuscated Tax",
            RiskBit::PrivilegeEscalation => "Privilege Escalation",
            RiskBit::ExternalCallRisk => "External Call Risk",
            RiskBit::LogicBomb => "Logic Bomb",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|bit| bit.label() == label)
    }

    pub fn family(self) -> DetectorFamily {
        if self.index() < 4 {
            DetectorFamily::Static
        } else {
            DetectorFamily::Ai
        }
    }

    /// Key the AI detectors use for this bit in their JSON answers.
    pub fn key(self) -> &'static str {
        match self {
            RiskBit::UnverifiedCode => "unverified_code",
            RiskBit::SellRestriction => "sell_restriction",
            RiskBit::KnownHoneypot => "known_honeypot",
            RiskBit::UpgradeableProxy => "upgradeable_proxy",
            RiskBit::ObfuscatedTax => "obfuscated_tax",
            RiskBit::PrivilegeEscalation => "privilege_escalation",
            RiskBit::ExternalCallRisk => "external_call_risk",
            RiskBit::LogicBomb => "logic_bomb",
        }
    }
}

/// Named entry of the decoded risk code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCheck {
    pub name: String,
    pub triggered: bool,
}

/// 8-bit risk code. Zero means clean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskMask(u8);

impl RiskMask {
    pub const CLEAN: RiskMask = RiskMask(0);
    pub const STATIC_BITS: RiskMask = RiskMask(0x0f);
    pub const AI_BITS: RiskMask = RiskMask(0xf0);

    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn is_clean(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, bit: RiskBit) -> bool {
        self.0 & bit.mask() != 0
    }

    pub fn with(self, bit: RiskBit) -> Self {
        Self(self.0 | bit.mask())
    }

    pub fn set(&mut self, bit: RiskBit, triggered: bool) {
        if triggered {
            self.0 |= bit.mask();
        } else {
            self.0 &= !bit.mask();
        }
    }

    pub fn only(self, family: DetectorFamily) -> Self {
        match family {
            DetectorFamily::Static => self & Self::STATIC_BITS,
            DetectorFamily::Ai => self & Self::AI_BITS,
        }
    }

    pub fn triggered(self) -> impl Iterator<Item = RiskBit> {
        RiskBit::ALL.into_iter().filter(move |bit| self.contains(*bit))
    }

    /// Decode into the ordered eight-entry checks list.
    pub fn checks(self) -> Vec<RiskCheck> {
        RiskBit::ALL
            .into_iter()
            .map(|bit| RiskCheck {
                name: bit.label().to_string(),
                triggered: self.contains(bit),
            })
            .collect()
    }

    /// Rebuild a mask from a checks list. Unknown names are rejected.
    pub fn from_checks(checks: &[RiskCheck]) -> Result<Self, String> {
        let mut mask = Self::CLEAN;
        for check in checks {
            let bit = RiskBit::from_label(&check.name)
                .ok_or_else(|| format!("unknown risk check '{}'", check.name))?;
            mask.set(bit, check.triggered);
        }
        Ok(mask)
    }
}

impl From<u8> for RiskMask {
    fn from(bits: u8) -> Self {
        Self(bits)
    }
}

impl From<RiskBit> for RiskMask {
    fn from(bit: RiskBit) -> Self {
        Self(bit.mask())
    }
}

impl BitOr for RiskMask {
    type Output = RiskMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RiskMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for RiskMask {
    type Output = RiskMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for RiskMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome class of an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    Approved,
    Blocked,
    Error,
}

/// Map a raw pipeline score to a verdict status.
///
/// Negative values and anything above 255 are internal faults, never a risk code.
pub fn interpret_score(score: i64) -> VerdictStatus {
    match score {
        0 => VerdictStatus::Approved,
        1..=255 => VerdictStatus::Blocked,
        _ => VerdictStatus::Error,
    }
}

/// Human summary of a mask for the verdict's reasoning field.
pub fn summarize(mask: RiskMask) -> String {
    if mask.is_clean() {
        return "No risk detectors triggered; trade cleared.".to_string();
    }
    let names: Vec<&str> = mask.triggered().map(RiskBit::label).collect();
    format!("Blocked by risk code {mask}: {}.", names.join(", "))
}

/// A raw score decoded for display: status, named checks and a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDecoding {
    pub score: i64,
    pub status: VerdictStatus,
    pub checks: Vec<RiskCheck>,
    pub reasoning: String,
}

/// Decode any raw score. Out-of-domain values get the error status and no checks.
pub fn decode_score(score: i64) -> RiskDecoding {
    match (interpret_score(score), u8::try_from(score)) {
        (VerdictStatus::Error, _) | (_, Err(_)) => RiskDecoding {
            score,
            status: VerdictStatus::Error,
            checks: Vec::new(),
            reasoning: format!("{score} is not a risk code"),
        },
        (status, Ok(bits)) => {
            let mask = RiskMask::new(bits);
            RiskDecoding {
                score,
                status,
                checks: mask.checks(),
                reasoning: summarize(mask),
            }
        }
    }
}
