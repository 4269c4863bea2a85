//! Attestation / reference intake protocol.
//!
//! A single attestation signal completes the run. The attestor must hold at
//! least Minimal verification and cannot attest for themselves; the
//! per-method multiplier cap is enforced by the orchestrator, not here.

use porch_types::{Level, ProtocolRunId, ProtocolState, SubjectId, Timestamp, VerificationMethod};

use crate::common::{FailureReason, Outcome};
use crate::error::ProtocolError;

/// Minimum verification level required of an attestor.
const ATTESTOR_MINIMUM_LEVEL: Level = Level::Minimal;

/// One attestation-intake run.
#[derive(Debug)]
pub struct AttestationIntake {
    run_id: ProtocolRunId,
    subject: SubjectId,
    method: VerificationMethod,
    deadline: Timestamp,
    state: ProtocolState,
    outcome: Option<Outcome>,
}

impl AttestationIntake {
    pub fn start(
        subject: SubjectId,
        run_id: ProtocolRunId,
        method: VerificationMethod,
        now: Timestamp,
        deadline_secs: u64,
    ) -> Self {
        Self {
            run_id,
            subject,
            method,
            deadline: now.plus_secs(deadline_secs),
            state: ProtocolState::Waiting,
            outcome: None,
        }
    }

    pub fn restore(
        subject: SubjectId,
        run_id: ProtocolRunId,
        method: VerificationMethod,
        deadline: Timestamp,
    ) -> Self {
        Self {
            run_id,
            subject,
            method,
            deadline,
            state: ProtocolState::Waiting,
            outcome: None,
        }
    }

    /// Handle an attestation signal.
    ///
    /// A denied attestor leaves the run live: someone else can still attest.
    pub fn attest(
        &mut self,
        attestor: SubjectId,
        attestor_level: Level,
        text: &str,
        now: Timestamp,
    ) -> Result<Outcome, ProtocolError> {
        if self.state != ProtocolState::Waiting {
            return Err(ProtocolError::NotActive);
        }
        if now > self.deadline {
            return Ok(self.finish(Outcome::Failed {
                reason: FailureReason::Expired,
            }));
        }
        if attestor == self.subject {
            return Err(ProtocolError::SelfAttestation);
        }
        if attestor_level < ATTESTOR_MINIMUM_LEVEL {
            return Err(ProtocolError::AttestorDenied(format!(
                "attestor level {attestor_level} below {ATTESTOR_MINIMUM_LEVEL}"
            )));
        }

        // Evidence: attestor id followed by the attestation text.
        let mut evidence = Vec::with_capacity(16 + text.len());
        evidence.extend_from_slice(attestor.as_bytes());
        evidence.extend_from_slice(text.as_bytes());
        Ok(self.finish(Outcome::Completed {
            evidence_ref: evidence,
        }))
    }

    pub fn on_deadline(&mut self, now: Timestamp) -> Option<Outcome> {
        if self.state != ProtocolState::Waiting || now < self.deadline {
            return None;
        }
        Some(self.finish(Outcome::Failed {
            reason: FailureReason::Timeout,
        }))
    }

    pub fn cancel(&mut self) -> Option<Outcome> {
        if self.state != ProtocolState::Waiting {
            return None;
        }
        self.state = ProtocolState::Cancelled;
        let outcome = Outcome::Failed {
            reason: FailureReason::Cancelled,
        };
        self.outcome = Some(outcome.clone());
        Some(outcome)
    }

    fn finish(&mut self, outcome: Outcome) -> Outcome {
        self.state = match outcome {
            Outcome::Completed { .. } => ProtocolState::Completed,
            Outcome::Failed { .. } => ProtocolState::Failed,
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    pub fn run_id(&self) -> ProtocolRunId {
        self.run_id
    }

    pub fn method(&self) -> VerificationMethod {
        self.method
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }
}
