//! Risk detectors. The static family applies deterministic rules to a token
//! security report; the AI family asks language models to read the source.

pub mod ai;
pub mod static_rules;

pub use ai::{AiDetector, ChunkSink, DetectorInput, MockModelClient, ModelAssessment, ModelClient, RigModelClient};
pub use static_rules::{GoPlusSecurity, StaticRules, TokenSecurityProvider, TokenSecurityReport};
