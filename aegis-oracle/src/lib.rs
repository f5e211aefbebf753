//! Off-chain audit oracle: source resolution with a decompiler fallback,
//! the static and AI detector families, risk-code aggregation, the progress
//! stream, and verdict commitment.

pub mod aggregator;
pub mod basescan;
pub mod committer;
pub mod decompiler;
pub mod detectors;
pub mod log;
pub mod pipeline;
pub mod resolver;
pub mod streamer;

pub use aggregator::{Aggregation, RiskDetectorAggregator};
pub use pipeline::AuditPipeline;
pub use resolver::SourceResolver;
pub use streamer::AuditStreamer;
