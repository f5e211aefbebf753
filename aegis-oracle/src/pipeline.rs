use std::sync::Arc;
use std::time::Duration;

use aegis_core::audit::{AuditRequest, RiskVerdict};
use aegis_core::error::AuditError;
use aegis_core::risk::VerdictStatus;
use aegis_core::source::SourceResult;
use aegis_core::stream::AuditPhase;
use aegis_core::wait::CancelSignal;
use alloy_primitives::Address;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::aggregator::RiskDetectorAggregator;
use crate::committer::VerdictCommitter;
use crate::resolver::SourceResolver;
use crate::streamer::AuditStreamer;

/// One audit end to end: resolve source, run detectors, map the risk code to
/// a verdict, optionally commit it, and narrate every step on the stream.
pub struct AuditPipeline {
    resolver: SourceResolver,
    aggregator: RiskDetectorAggregator,
    committer: Option<Arc<VerdictCommitter>>,
    source_timeout: Duration,
}

impl AuditPipeline {
    pub fn new(
        resolver: SourceResolver,
        aggregator: RiskDetectorAggregator,
        source_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            aggregator,
            committer: None,
            source_timeout,
        }
    }

    pub fn with_committer(mut self, committer: Arc<VerdictCommitter>) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Run one audit. Every failure that ends the run is reported once on the
    /// stream as a fatal error before it is returned.
    pub async fn run(
        &self,
        request: &AuditRequest,
        streamer: &AuditStreamer,
        cancel: &CancelSignal,
    ) -> Result<RiskVerdict, AuditError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("audit", %run_id, trade_id = %request.trade_id);
        match self.execute(request, streamer, cancel).instrument(span).await {
            Ok(verdict) => Ok(verdict),
            Err(err) => {
                error!(%run_id, trade_id = %request.trade_id, error = %err, "audit failed");
                streamer.fatal(&err.to_string());
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        request: &AuditRequest,
        streamer: &AuditStreamer,
        cancel: &CancelSignal,
    ) -> Result<RiskVerdict, AuditError> {
        if request.target_token == Address::ZERO {
            return Err(AuditError::input("target token is the zero address"));
        }
        let token = request.target_token;
        info!(trade_id = %request.trade_id, %token, "audit started");

        streamer.phase_running(AuditPhase::ResolveSource);
        let source = match tokio::time::timeout(
            self.source_timeout,
            self.resolver.resolve(token, cancel),
        )
        .await
        {
            Ok(source) => source,
            Err(_) => {
                warn!(
                    %token,
                    timeout_ms = u64::try_from(self.source_timeout.as_millis()).unwrap_or(u64::MAX),
                    "source resolution timed out"
                );
                SourceResult::none()
            }
        };
        if cancel.is_cancelled() {
            return Err(AuditError::Cancelled {
                operation: "audit".to_string(),
            });
        }
        info!(%token, provider = source.provider.as_str(), "source resolved");
        streamer.phase_done(AuditPhase::ResolveSource);

        let aggregation = self.aggregator.run(token, &source, streamer).await;

        streamer.phase_running(AuditPhase::ComputeRiskCode);
        let verdict = RiskVerdict::from_raw_score(request, i64::from(aggregation.mask.bits()));
        if verdict.status == VerdictStatus::Error {
            return Err(AuditError::pipeline(verdict.reasoning));
        }
        info!(
            trade_id = %request.trade_id,
            risk_score = verdict.risk_score,
            status = ?verdict.status,
            failed_detectors = aggregation.failed.len(),
            "risk code computed"
        );
        streamer.phase_done(AuditPhase::ComputeRiskCode);

        if let Some(committer) = &self.committer {
            streamer.phase_running(AuditPhase::CommitVerdict);
            committer.commit(&verdict, streamer, cancel).await?;
            streamer.phase_done(AuditPhase::CommitVerdict);
        }

        streamer.final_verdict(&verdict)?;
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{
        AiDetector, MockModelClient, TokenSecurityProvider, TokenSecurityReport,
    };
    use crate::resolver::doubles::{CountingDecompiler, StaticBytecode, StaticVerifiedSource};
    use crate::resolver::{Decompiler, VerifiedSourceProvider};
    use aegis_core::config::DetectorsConfig;
    use aegis_core::risk::RiskBit;
    use aegis_core::stream::{AuditEvent, PhaseStatus, StreamOutcome};
    use aegis_core::wait::cancel_pair;
    use alloy_primitives::U256;
    use async_trait::async_trait;

    struct CleanSecurity;

    #[async_trait]
    impl TokenSecurityProvider for CleanSecurity {
        async fn token_security(&self, _token: Address) -> Result<TokenSecurityReport, AuditError> {
            Ok(TokenSecurityReport::default())
        }
    }

    /// Never answers until cancelled or dropped.
    struct StuckDecompiler;

    #[async_trait]
    impl Decompiler for StuckDecompiler {
        async fn decompile(&self, _bytecode: &str, cancel: &CancelSignal) -> Result<String, AuditError> {
            cancel.cancelled().await;
            Err(AuditError::Cancelled {
                operation: "decompile".to_string(),
            })
        }
    }

    fn request() -> AuditRequest {
        AuditRequest {
            trade_id: U256::from(11),
            target_token: "0x00000000000000000000000000000000000000aa"
                .parse()
                .expect("address"),
            start_block: 0,
        }
    }

    fn pipeline(
        verified: Arc<dyn VerifiedSourceProvider>,
        decompiler: Arc<dyn Decompiler>,
        models: Vec<AiDetector>,
    ) -> AuditPipeline {
        let resolver = SourceResolver::new(
            verified,
            Arc::new(StaticBytecode::code("0x6080604052")),
            decompiler,
        );
        let aggregator =
            RiskDetectorAggregator::new(Arc::new(CleanSecurity), models, &DetectorsConfig::default());
        AuditPipeline::new(resolver, aggregator, Duration::from_secs(45))
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<AuditEvent>) -> Vec<AuditEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn stream_ends_in_one_final_verdict_after_all_phases() {
        let pipeline = pipeline(
            Arc::new(StaticVerifiedSource::found("contract T{}", "T")),
            Arc::new(CountingDecompiler::returning(Ok(String::new()))),
            vec![AiDetector::new(
                "GPT-4o",
                Arc::new(MockModelClient::flagging(&[RiskBit::PrivilegeEscalation], "owner mint")),
            )],
        );
        let (streamer, mut rx) = AuditStreamer::channel();

        let verdict = pipeline
            .run(&request(), &streamer, &CancelSignal::never())
            .await
            .expect("verdict");
        assert_eq!(verdict.risk_score, 32);
        assert_eq!(verdict.status, VerdictStatus::Blocked);

        let events = drain(&mut rx);
        let last = events.last().expect("events");
        assert!(matches!(last, AuditEvent::FinalVerdict { .. }));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        let phase_events: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AuditEvent::Phase { phase, status, .. } => Some((*phase, *status)),
                _ => None,
            })
            .collect();
        for phase in [
            AuditPhase::ResolveSource,
            AuditPhase::StaticAnalysis,
            AuditPhase::AiConsensus,
            AuditPhase::ComputeRiskCode,
        ] {
            let running = phase_events.iter().position(|p| *p == (phase, PhaseStatus::Running));
            let done = phase_events.iter().position(|p| *p == (phase, PhaseStatus::Done));
            assert!(running.is_some() && running < done, "{phase:?}");
        }
    }

    #[tokio::test]
    async fn zero_address_is_a_fatal_input_error() {
        let pipeline = pipeline(
            Arc::new(StaticVerifiedSource::missing()),
            Arc::new(CountingDecompiler::returning(Ok(String::new()))),
            vec![],
        );
        let (streamer, mut rx) = AuditStreamer::channel();
        let mut bad = request();
        bad.target_token = Address::ZERO;

        let err = pipeline
            .run(&bad, &streamer, &CancelSignal::never())
            .await
            .expect_err("input error");
        assert_eq!(err.status_code(), 400);
        assert!(matches!(
            StreamOutcome::from_events(&drain(&mut rx)),
            StreamOutcome::Fatal(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn source_timeout_downgrades_to_unverified() {
        let resolver = SourceResolver::new(
            Arc::new(StaticVerifiedSource::missing()),
            Arc::new(StaticBytecode::code("0x6080604052")),
            Arc::new(StuckDecompiler),
        );
        let aggregator = RiskDetectorAggregator::new(
            Arc::new(CleanSecurity),
            vec![],
            &DetectorsConfig::default(),
        );
        let pipeline = AuditPipeline::new(resolver, aggregator, Duration::from_secs(45));

        let verdict = pipeline
            .run(&request(), &AuditStreamer::detached(), &CancelSignal::never())
            .await
            .expect("verdict despite stuck decompiler");
        assert_eq!(verdict.risk_score, 1);
        assert_eq!(verdict.checks[0].name, "Unverified Code");
        assert!(verdict.checks[0].triggered);
    }

    #[tokio::test]
    async fn cancelled_run_ends_with_fatal_error() {
        let pipeline = pipeline(
            Arc::new(StaticVerifiedSource::missing()),
            Arc::new(StuckDecompiler),
            vec![],
        );
        let (handle, signal) = cancel_pair();
        let (streamer, mut rx) = AuditStreamer::channel();
        handle.cancel();

        let err = pipeline
            .run(&request(), &streamer, &signal)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, AuditError::Cancelled { .. }));

        let events = drain(&mut rx);
        assert!(events.contains(&AuditEvent::Phase {
            phase: AuditPhase::ResolveSource,
            label: AuditPhase::ResolveSource.label().to_string(),
            status: PhaseStatus::Error,
        }));
        assert!(matches!(events.last(), Some(AuditEvent::FatalError { .. })));
    }
}
