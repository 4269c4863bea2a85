//! Human-review protocol (government id and document-backed methods).
//!
//! The caller supplies a document blob handle at start; the run submits a
//! review task to the external queue and then blocks on the reviewer's
//! decision, with a long deadline.

use sha2::{Digest, Sha256};

use porch_types::{ProtocolRunId, ProtocolState, SubjectId, Timestamp, VerificationMethod};

use crate::common::{Effect, FailureReason, Outcome};
use crate::error::ProtocolError;

/// One human-review run.
#[derive(Debug)]
pub struct HumanReview {
    run_id: ProtocolRunId,
    subject: SubjectId,
    method: VerificationMethod,
    blob_ref: Vec<u8>,
    deadline: Timestamp,
    state: ProtocolState,
    outcome: Option<Outcome>,
}

impl HumanReview {
    /// Start a review: enqueue the document and await the decision.
    pub fn start(
        subject: SubjectId,
        run_id: ProtocolRunId,
        method: VerificationMethod,
        blob_ref: Vec<u8>,
        now: Timestamp,
        review_deadline_secs: u64,
    ) -> (Self, Vec<Effect>) {
        let review = Self {
            run_id,
            subject,
            method,
            blob_ref: blob_ref.clone(),
            deadline: now.plus_secs(review_deadline_secs),
            state: ProtocolState::AwaitingReview,
            outcome: None,
        };
        let effects = vec![Effect::EnqueueReview {
            subject,
            method,
            blob_ref,
        }];
        (review, effects)
    }

    /// Restore a live run after a restart. The review task is already in the
    /// external queue; it is not re-submitted.
    pub fn restore(
        subject: SubjectId,
        run_id: ProtocolRunId,
        method: VerificationMethod,
        blob_ref: Vec<u8>,
        deadline: Timestamp,
    ) -> Self {
        Self {
            run_id,
            subject,
            method,
            blob_ref,
            deadline,
            state: ProtocolState::AwaitingReview,
            outcome: None,
        }
    }

    /// Handle the reviewer's decision.
    pub fn decision(
        &mut self,
        approved: bool,
        reason: Option<String>,
        now: Timestamp,
    ) -> Result<Outcome, ProtocolError> {
        if self.state != ProtocolState::AwaitingReview {
            return Err(ProtocolError::NotActive);
        }
        if now > self.deadline {
            return Ok(self.finish(Outcome::Failed {
                reason: FailureReason::Expired,
            }));
        }

        let outcome = if approved {
            // Evidence is the document hash, not the document.
            let hash: [u8; 32] = Sha256::digest(&self.blob_ref).into();
            Outcome::Completed {
                evidence_ref: hash.to_vec(),
            }
        } else {
            Outcome::Failed {
                reason: FailureReason::Rejected {
                    reason: reason.unwrap_or_else(|| "unspecified".into()),
                },
            }
        };
        Ok(self.finish(outcome))
    }

    pub fn on_deadline(&mut self, now: Timestamp) -> Option<Outcome> {
        if self.state != ProtocolState::AwaitingReview || now < self.deadline {
            return None;
        }
        Some(self.finish(Outcome::Failed {
            reason: FailureReason::Timeout,
        }))
    }

    pub fn cancel(&mut self) -> Option<Outcome> {
        if self.state != ProtocolState::AwaitingReview {
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
