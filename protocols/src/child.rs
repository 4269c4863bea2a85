//! Static dispatch of verification methods onto their protocols.
//!
//! Every method maps to exactly one protocol shape; the table is fixed at
//! compile time. [`Child`] wraps the four protocol machines behind the
//! capability set the orchestrator drives them through.

use porch_types::event::CodeChallengeSetup;
use porch_types::{
    EngineParams, MethodParams, ProtocolRunId, ProtocolState, SubjectId, Timestamp,
    VerificationMethod,
};

use crate::attestation::AttestationIntake;
use crate::code_challenge::CodeChallenge;
use crate::common::{Effect, Outcome, TokenSource};
use crate::error::ProtocolError;
use crate::human_review::HumanReview;
use crate::two_party::{SagaProgress, TwoPartySaga};

/// The protocol shape a method runs as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolKind {
    CodeChallenge,
    TwoParty,
    HumanReview,
    Attestation,
}

/// Which protocol a method runs as.
///
/// History methods go through the review queue too: the external checker
/// computes the history and answers with a review decision.
pub fn protocol_kind(method: VerificationMethod) -> ProtocolKind {
    use VerificationMethod::*;
    match method {
        Email | Phone => ProtocolKind::CodeChallenge,
        TwoPartyInPerson => ProtocolKind::TwoParty,
        PersonalReference | CommunityAttestation | BusinessReference | CommunityEndorsement
        | OrgReference | NotaryVerification | OwnerVerification | BoardVerification => {
            ProtocolKind::Attestation
        }
        GovernmentId | Biometric | PlatformHistory | TransactionHistory | BusinessLicense
        | TaxId | BusinessAddress | BusinessInsurance | ProfessionalLicense | NonprofitStatus
        | OrgBylaws | MissionAlignment => ProtocolKind::HumanReview,
    }
}

/// One live child protocol.
#[derive(Debug)]
pub enum Child {
    Code(CodeChallenge),
    TwoParty(TwoPartySaga),
    Review(HumanReview),
    Attestation(AttestationIntake),
}

/// Result of cancelling a child.
#[derive(Debug)]
pub enum ChildCancel {
    /// Terminal immediately; no side effects to reverse.
    Immediate(Outcome),
    /// The child has compensation to run first.
    Compensating(SagaProgress),
    /// Already terminal; nothing to do.
    AlreadyTerminal,
}

/// Result of a deadline firing on a child.
#[derive(Debug)]
pub enum ChildDeadline {
    NotDue,
    Outcome(Outcome),
    Compensating(SagaProgress),
}

impl Child {
    /// Start the protocol for `method`, validating the supplied parameters.
    pub fn start(
        subject: SubjectId,
        run_id: ProtocolRunId,
        method: VerificationMethod,
        params: &MethodParams,
        engine: &EngineParams,
        now: Timestamp,
        tokens: &dyn TokenSource,
    ) -> Result<(Self, Vec<Effect>), ProtocolError> {
        match protocol_kind(method) {
            ProtocolKind::CodeChallenge => {
                let target = match params {
                    MethodParams::Email { address } => address.clone(),
                    MethodParams::Phone { number } => number.clone(),
                    other => {
                        return Err(ProtocolError::BadParams(format!(
                            "{method} needs a delivery target, got {other:?}"
                        )))
                    }
                };
                let (challenge, effects) =
                    CodeChallenge::start(run_id, method, target, now, engine, tokens);
                Ok((Child::Code(challenge), effects))
            }
            ProtocolKind::TwoParty => {
                let (saga, effects) = TwoPartySaga::start(
                    subject,
                    run_id,
                    now,
                    engine.two_party_deadline_secs,
                    engine.compensation_max_attempts,
                    tokens,
                );
                Ok((Child::TwoParty(saga), effects))
            }
            ProtocolKind::HumanReview => {
                let blob_ref = match params {
                    MethodParams::Document { blob_ref } => blob_ref.clone(),
                    other => {
                        return Err(ProtocolError::BadParams(format!(
                            "{method} needs a document reference, got {other:?}"
                        )))
                    }
                };
                let (review, effects) = HumanReview::start(
                    subject,
                    run_id,
                    method,
                    blob_ref,
                    now,
                    engine.review_deadline_secs,
                );
                Ok((Child::Review(review), effects))
            }
            ProtocolKind::Attestation => {
                let intake = AttestationIntake::start(
                    subject,
                    run_id,
                    method,
                    now,
                    engine.attestation_deadline_secs,
                );
                Ok((Child::Attestation(intake), Vec::new()))
            }
        }
    }

    /// Restore a live run after a restart.
    ///
    /// `challenge` is the journalled code-challenge setup; `slot_tokens` are
    /// the two-party tokens read back from the token store.
    pub fn restore(
        subject: SubjectId,
        run_id: ProtocolRunId,
        method: VerificationMethod,
        params: &MethodParams,
        deadline: Timestamp,
        engine: &EngineParams,
        challenge: Option<&CodeChallengeSetup>,
        slot_tokens: Option<([[u8; 32]; 2], Timestamp)>,
    ) -> Result<Self, ProtocolError> {
        match protocol_kind(method) {
            ProtocolKind::CodeChallenge => {
                let target = match params {
                    MethodParams::Email { address } => address.clone(),
                    MethodParams::Phone { number } => number.clone(),
                    other => {
                        return Err(ProtocolError::BadParams(format!(
                            "{method} needs a delivery target, got {other:?}"
                        )))
                    }
                };
                let setup = challenge.ok_or_else(|| {
                    ProtocolError::BadParams(format!("{method} run has no stored challenge"))
                })?;
                Ok(Child::Code(CodeChallenge::restore(
                    run_id, method, target, setup, deadline,
                )))
            }
            ProtocolKind::TwoParty => {
                let (tokens, expires_at) = slot_tokens.ok_or_else(|| {
                    ProtocolError::BadParams(format!("{method} run has no stored tokens"))
                })?;
                Ok(Child::TwoParty(TwoPartySaga::restore(
                    subject,
                    run_id,
                    tokens,
                    expires_at,
                    deadline,
                    engine.compensation_max_attempts,
                )))
            }
            ProtocolKind::HumanReview => {
                let blob_ref = match params {
                    MethodParams::Document { blob_ref } => blob_ref.clone(),
                    other => {
                        return Err(ProtocolError::BadParams(format!(
                            "{method} needs a document reference, got {other:?}"
                        )))
                    }
                };
                Ok(Child::Review(HumanReview::restore(
                    subject, run_id, method, blob_ref, deadline,
                )))
            }
            ProtocolKind::Attestation => Ok(Child::Attestation(AttestationIntake::restore(
                subject, run_id, method, deadline,
            ))),
        }
    }

    pub fn run_id(&self) -> ProtocolRunId {
        match self {
            Child::Code(c) => c.run_id(),
            Child::TwoParty(s) => s.run_id(),
            Child::Review(r) => r.run_id(),
            Child::Attestation(a) => a.run_id(),
        }
    }

    pub fn method(&self) -> VerificationMethod {
        match self {
            Child::Code(c) => c.method(),
            Child::TwoParty(_) => VerificationMethod::TwoPartyInPerson,
            Child::Review(r) => r.method(),
            Child::Attestation(a) => a.method(),
        }
    }

    pub fn state(&self) -> ProtocolState {
        match self {
            Child::Code(c) => c.state(),
            Child::TwoParty(s) => s.state(),
            Child::Review(r) => r.state(),
            Child::Attestation(a) => a.state(),
        }
    }

    pub fn deadline(&self) -> Timestamp {
        match self {
            Child::Code(c) => c.deadline(),
            Child::TwoParty(s) => s.deadline(),
            Child::Review(r) => r.deadline(),
            Child::Attestation(a) => a.deadline(),
        }
    }

    pub fn cancel(&mut self) -> ChildCancel {
        match self {
            Child::Code(c) => c
                .cancel()
                .map(ChildCancel::Immediate)
                .unwrap_or(ChildCancel::AlreadyTerminal),
            Child::TwoParty(s) => s
                .cancel()
                .map(ChildCancel::Compensating)
                .unwrap_or(ChildCancel::AlreadyTerminal),
            Child::Review(r) => r
                .cancel()
                .map(ChildCancel::Immediate)
                .unwrap_or(ChildCancel::AlreadyTerminal),
            Child::Attestation(a) => a
                .cancel()
                .map(ChildCancel::Immediate)
                .unwrap_or(ChildCancel::AlreadyTerminal),
        }
    }

    pub fn on_deadline(&mut self, now: Timestamp) -> ChildDeadline {
        match self {
            Child::Code(c) => c
                .on_deadline(now)
                .map(ChildDeadline::Outcome)
                .unwrap_or(ChildDeadline::NotDue),
            Child::TwoParty(s) => s
                .on_deadline(now)
                .map(ChildDeadline::Compensating)
                .unwrap_or(ChildDeadline::NotDue),
            Child::Review(r) => r
                .on_deadline(now)
                .map(ChildDeadline::Outcome)
                .unwrap_or(ChildDeadline::NotDue),
            Child::Attestation(a) => a
                .on_deadline(now)
                .map(ChildDeadline::Outcome)
                .unwrap_or(ChildDeadline::NotDue),
        }
    }
}
