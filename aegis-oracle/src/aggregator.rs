use std::sync::Arc;
use std::time::Duration;

use aegis_core::config::DetectorsConfig;
use aegis_core::risk::{DetectorFamily, RiskBit, RiskMask};
use aegis_core::source::SourceResult;
use aegis_core::stream::AuditPhase;
use alloy_primitives::Address;
use tracing::{info, warn};

use crate::detectors::{
    AiDetector, DetectorInput, ModelAssessment, StaticRules, TokenSecurityProvider,
};
use crate::streamer::AuditStreamer;

/// Stream name of the static detector family.
pub const STATIC_DETECTOR: &str = "GoPlus";

/// Everything the aggregator learned about one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub mask: RiskMask,
    pub static_mask: RiskMask,
    pub ai_mask: RiskMask,
    pub assessments: Vec<ModelAssessment>,
    /// Detectors that failed or timed out; their bits count as not triggered.
    pub failed: Vec<String>,
    pub ai_skipped: bool,
}

/// Runs the static and AI detector families concurrently and folds their
/// bits into one risk code.
pub struct RiskDetectorAggregator {
    security: Arc<dyn TokenSecurityProvider>,
    rules: StaticRules,
    models: Vec<AiDetector>,
    strict_consensus: bool,
    detector_timeout: Duration,
}

impl RiskDetectorAggregator {
    pub fn new(
        security: Arc<dyn TokenSecurityProvider>,
        models: Vec<AiDetector>,
        config: &DetectorsConfig,
    ) -> Self {
        Self {
            security,
            rules: StaticRules::new(config.sell_tax_threshold),
            models,
            strict_consensus: config.strict_consensus,
            detector_timeout: Duration::from_millis(config.detector_timeout_ms),
        }
    }

    pub async fn run(
        &self,
        token: Address,
        source: &SourceResult,
        streamer: &AuditStreamer,
    ) -> Aggregation {
        streamer.phase_running(AuditPhase::StaticAnalysis);
        streamer.phase_running(AuditPhase::AiConsensus);

        let static_task = tokio::spawn(run_static(
            self.security.clone(),
            self.rules,
            token,
            source.clone(),
            self.detector_timeout,
            streamer.clone(),
        ));

        let ai_skipped = !source.is_available();
        let mut ai_tasks = Vec::new();
        if ai_skipped {
            info!(%token, "no readable source; AI detectors skipped");
        } else {
            let input = DetectorInput::from_source(token, source);
            for detector in &self.models {
                ai_tasks.push((
                    detector.name().to_string(),
                    tokio::spawn(run_model(
                        detector.clone(),
                        input.clone(),
                        self.detector_timeout,
                        streamer.clone(),
                    )),
                ));
            }
        }

        let mut failed = Vec::new();
        let static_mask = match static_task.await {
            Ok((mask, ok)) => {
                if !ok {
                    failed.push(STATIC_DETECTOR.to_string());
                }
                mask
            }
            Err(err) => {
                warn!(error = %err, "static detector task aborted");
                streamer.detector_error(STATIC_DETECTOR, &err.to_string());
                failed.push(STATIC_DETECTOR.to_string());
                self.rules.evaluate(None, source)
            }
        };
        streamer.phase_done(AuditPhase::StaticAnalysis);

        let mut assessments = Vec::new();
        for (name, task) in ai_tasks {
            match task.await {
                Ok(Some(assessment)) => assessments.push(assessment),
                Ok(None) => failed.push(name),
                Err(err) => {
                    warn!(detector = %name, error = %err, "AI detector task aborted");
                    streamer.detector_error(&name, &err.to_string());
                    failed.push(name);
                }
            }
        }
        let votes: Vec<RiskMask> = assessments.iter().map(|a| a.mask).collect();
        let ai_mask = combine(&votes, self.strict_consensus);
        streamer.phase_done(AuditPhase::AiConsensus);

        let mut mask = static_mask.only(DetectorFamily::Static) | ai_mask;
        if ai_skipped {
            mask = mask.with(RiskBit::UnverifiedCode);
        }

        Aggregation {
            mask,
            static_mask,
            ai_mask,
            assessments,
            failed,
            ai_skipped,
        }
    }
}

/// Fold per-model AI votes. OR by default; with `strict`, a bit fires only
/// when every participating model flags it. No participants means no AI bits.
pub fn combine(votes: &[RiskMask], strict: bool) -> RiskMask {
    let Some(first) = votes.first() else {
        return RiskMask::CLEAN;
    };
    let folded = if strict {
        votes.iter().fold(*first, |acc, vote| acc & *vote)
    } else {
        votes.iter().fold(RiskMask::CLEAN, |acc, vote| acc | *vote)
    };
    folded.only(DetectorFamily::Ai)
}

/// Returns the static bits and whether the security lookup succeeded.
async fn run_static(
    security: Arc<dyn TokenSecurityProvider>,
    rules: StaticRules,
    token: Address,
    source: SourceResult,
    timeout: Duration,
    streamer: AuditStreamer,
) -> (RiskMask, bool) {
    streamer.detector_started(STATIC_DETECTOR, DetectorFamily::Static);
    let report = match tokio::time::timeout(timeout, security.token_security(token)).await {
        Ok(Ok(report)) => Some(report),
        Ok(Err(err)) => {
            warn!(%token, error = %err, "token security lookup failed");
            streamer.detector_error(STATIC_DETECTOR, &err.to_string());
            None
        }
        Err(_) => {
            warn!(%token, "token security lookup timed out");
            streamer.detector_error(
                STATIC_DETECTOR,
                &format!("timed out after {}ms", timeout.as_millis()),
            );
            None
        }
    };

    let mask = rules.evaluate(report.as_ref(), &source);
    if report.is_some() {
        streamer.detector_score(STATIC_DETECTOR, mask.bits());
    }
    (mask, report.is_some())
}

async fn run_model(
    detector: AiDetector,
    input: DetectorInput,
    timeout: Duration,
    streamer: AuditStreamer,
) -> Option<ModelAssessment> {
    let name = detector.name().to_string();
    streamer.detector_started(&name, DetectorFamily::Ai);
    streamer.detector_reasoning_started(&name);
    let on_chunk = |chunk: &str| streamer.detector_reasoning_chunk(&name, chunk);

    match tokio::time::timeout(timeout, detector.assess_streaming(&input, &on_chunk)).await {
        Ok(Ok(assessment)) => {
            streamer.detector_score(&name, assessment.mask.bits());
            Some(assessment)
        }
        Ok(Err(err)) => {
            warn!(detector = %name, error = %err, "AI detector failed");
            streamer.detector_error(&name, &err.to_string());
            None
        }
        Err(_) => {
            warn!(detector = %name, "AI detector timed out");
            streamer.detector_error(&name, &format!("timed out after {}ms", timeout.as_millis()));
            None
        }
    }
}
