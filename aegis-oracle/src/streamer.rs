use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use aegis_core::audit::RiskVerdict;
use aegis_core::error::AuditError;
use aegis_core::risk::DetectorFamily;
use aegis_core::stream::{AuditEvent, AuditPhase, PhaseStatus};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Default)]
struct StreamState {
    phases: HashMap<AuditPhase, PhaseStatus>,
    /// `true` once the detector emitted its score or error.
    detectors: HashMap<String, bool>,
    /// Detectors whose reasoning stream has opened.
    reasoning: HashSet<String>,
    terminated: bool,
}

/// Ordered progress feed for one audit run.
///
/// Enforces the stream contract: a phase goes running then terminal, a
/// detector's events follow its start, reasoning chunks follow the
/// reasoning start, nothing follows the single terminal
/// record, and a final verdict waits for every phase to finish. Out-of-order
/// emissions are dropped with a warning.
#[derive(Clone)]
pub struct AuditStreamer {
    tx: Option<mpsc::UnboundedSender<AuditEvent>>,
    state: Arc<Mutex<StreamState>>,
}

impl AuditStreamer {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                state: Arc::default(),
            },
            rx,
        )
    }

    /// A streamer with no consumer. Ordering is still tracked.
    pub fn detached() -> Self {
        Self {
            tx: None,
            state: Arc::default(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().map(|s| s.terminated).unwrap_or(true)
    }

    pub fn phase_running(&self, phase: AuditPhase) {
        self.phase(phase, PhaseStatus::Running);
    }

    pub fn phase_done(&self, phase: AuditPhase) {
        self.phase(phase, PhaseStatus::Done);
    }

    pub fn phase_error(&self, phase: AuditPhase) {
        self.phase(phase, PhaseStatus::Error);
    }

    fn phase(&self, phase: AuditPhase, status: PhaseStatus) {
        self.emit_with(|state| {
            let current = state.phases.get(&phase).copied();
            let allowed = match (current, status) {
                (None, PhaseStatus::Running) => true,
                (Some(PhaseStatus::Running), next) => next.is_terminal(),
                _ => false,
            };
            if !allowed {
                warn!(?phase, ?current, ?status, "dropping out-of-order phase event");
                return None;
            }
            state.phases.insert(phase, status);
            Some(AuditEvent::Phase {
                phase,
                label: phase.label().to_string(),
                status,
            })
        });
    }

    pub fn detector_started(&self, detector: &str, family: DetectorFamily) {
        self.emit_with(|state| {
            if state.detectors.contains_key(detector) {
                warn!(detector, "detector already started");
                return None;
            }
            state.detectors.insert(detector.to_string(), false);
            Some(AuditEvent::DetectorStarted {
                detector: detector.to_string(),
                family,
            })
        });
    }

    pub fn detector_reasoning_started(&self, detector: &str) {
        self.emit_with(|state| {
            if !detector_open(state, detector) || !state.reasoning.insert(detector.to_string()) {
                warn!(detector, "dropping reasoning start outside its sequence");
                return None;
            }
            Some(AuditEvent::DetectorReasoningStart {
                detector: detector.to_string(),
            })
        });
    }

    pub fn detector_reasoning_chunk(&self, detector: &str, text: &str) {
        self.emit_with(|state| {
            if !detector_open(state, detector) || !state.reasoning.contains(detector) {
                warn!(detector, "dropping reasoning chunk outside its sequence");
                return None;
            }
            Some(AuditEvent::DetectorReasoningChunk {
                detector: detector.to_string(),
                text: text.to_string(),
            })
        });
    }

    pub fn detector_score(&self, detector: &str, bits: u8) {
        self.detector_event(detector, true, || AuditEvent::DetectorScore {
            detector: detector.to_string(),
            bits,
        });
    }

    pub fn detector_error(&self, detector: &str, message: &str) {
        self.detector_event(detector, true, || AuditEvent::DetectorError {
            detector: detector.to_string(),
            message: message.to_string(),
        });
    }

    fn detector_event(&self, detector: &str, terminal: bool, event: impl FnOnce() -> AuditEvent) {
        self.emit_with(|state| match state.detectors.get_mut(detector) {
            Some(finished) if !*finished => {
                *finished = terminal;
                Some(event())
            }
            _ => {
                warn!(detector, "dropping detector event outside its sequence");
                None
            }
        });
    }

    pub fn transaction_submitted(&self, hash: &str) {
        self.emit_with(|_| {
            Some(AuditEvent::TransactionSubmitted {
                hash: hash.to_string(),
            })
        });
    }

    pub fn transaction_confirmed(&self, hash: &str, block_number: Option<u64>, success: bool) {
        self.emit_with(|_| {
            Some(AuditEvent::TransactionConfirmed {
                hash: hash.to_string(),
                block_number,
                success,
            })
        });
    }

    /// Emit the terminal verdict. Refused while a phase is still running.
    pub fn final_verdict(&self, verdict: &RiskVerdict) -> Result<(), AuditError> {
        let mut refused = None;
        self.emit_with(|state| {
            if let Some((phase, _)) = state
                .phases
                .iter()
                .find(|(_, status)| !status.is_terminal())
            {
                refused = Some(AuditError::pipeline(format!(
                    "final verdict while {phase:?} is still running"
                )));
                return None;
            }
            state.terminated = true;
            Some(AuditEvent::FinalVerdict {
                verdict: verdict.clone(),
            })
        });
        refused.map_or(Ok(()), Err)
    }

    /// Close every running phase as failed, then emit the terminal error.
    pub fn fatal(&self, message: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.terminated {
            return;
        }
        let mut running: Vec<AuditPhase> = state
            .phases
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(phase, _)| *phase)
            .collect();
        running.sort_by_key(|phase| *phase as u8);

        for phase in running {
            state.phases.insert(phase, PhaseStatus::Error);
            self.send(AuditEvent::Phase {
                phase,
                label: phase.label().to_string(),
                status: PhaseStatus::Error,
            });
        }
        state.terminated = true;
        self.send(AuditEvent::FatalError {
            message: message.to_string(),
        });
    }

    fn emit_with(&self, build: impl FnOnce(&mut StreamState) -> Option<AuditEvent>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.terminated {
            return;
        }
        // Sending under the lock keeps channel order equal to state order.
        if let Some(event) = build(&mut state) {
            self.send(event);
        }
    }

    fn send(&self, event: AuditEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver means the client went away; the run continues.
            let _ = tx.send(event);
        }
    }
}

/// Started and not yet scored or failed.
fn detector_open(state: &StreamState, detector: &str) -> bool {
    state.detectors.get(detector) == Some(&false)
}
