//! Shared protocol vocabulary: outcomes, side-effect requests, randomness.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use porch_types::{SubjectId, Timestamp, VerificationMethod};

/// Why a protocol run failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The run's deadline passed without the required signals.
    Timeout,
    /// All code attempts were used up.
    Exhausted,
    /// The delivered code or token lapsed before use.
    Expired,
    /// A confirming verifier failed authorization.
    UnauthorizedVerifier { verifier: SubjectId, denial: String },
    /// A human reviewer rejected the submission.
    Rejected { reason: String },
    /// Cancelled from outside.
    Cancelled,
    /// Compensation could not be completed; needs operator attention.
    CompensationIncomplete,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Exhausted => write!(f, "exhausted"),
            FailureReason::Expired => write!(f, "expired"),
            FailureReason::UnauthorizedVerifier { verifier, denial } => {
                write!(f, "unauthorized_verifier:{verifier}:{denial}")
            }
            FailureReason::Rejected { reason } => write!(f, "rejected:{reason}"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::CompensationIncomplete => write!(f, "compensation_incomplete"),
        }
    }
}

/// Terminal result of a protocol run. Emitted at most once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Completed { evidence_ref: Vec<u8> },
    Failed { reason: FailureReason },
}

/// A side effect the orchestrator must perform on a protocol's behalf.
///
/// Protocols never touch collaborators or stores directly; they hand these
/// back and the driver executes them (with retries where the effect is
/// against an external collaborator).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Deliver a challenge code to an email address or phone number.
    SendCode {
        target: String,
        code: String,
        ttl_secs: u64,
    },
    /// Persist a QR slot token.
    StoreToken {
        token: [u8; 32],
        slot: u8,
        expires_at: Timestamp,
    },
    /// Mark a QR slot token unusable.
    InvalidateToken { token: [u8; 32] },
    /// Submit a document to the external review queue.
    EnqueueReview {
        subject: SubjectId,
        method: VerificationMethod,
        blob_ref: Vec<u8>,
    },
    /// Record a verifier confirmation: journal event + counter increment.
    CreditConfirmation {
        verifier: SubjectId,
        evidence: Vec<u8>,
    },
    /// Undo a recorded confirmation: journal event + counter decrement.
    RevokeConfirmation { verifier: SubjectId },
    /// Void a collected-but-never-credited confirmation: journal event
    /// only, the verifier's counter was never touched.
    AnnulConfirmation { verifier: SubjectId },
    /// Tell a verifier their confirmation was rolled back.
    NotifyConfirmationRevoked { verifier: SubjectId },
}

/// Source of protocol randomness: tokens, salts, codes, run ids.
///
/// Production uses [`SystemTokenSource`]; tests inject a deterministic
/// source from `porch_nullables`.
pub trait TokenSource: Send + Sync {
    /// A fresh 256-bit opaque token.
    fn fresh_token(&self) -> [u8; 32];

    /// A fresh 128-bit salt / identifier.
    fn fresh_id(&self) -> [u8; 16];

    /// A fresh 6-digit numeric code, zero-padded.
    fn fresh_code(&self) -> String;
}

/// OS-randomness token source.
pub struct SystemTokenSource;

impl TokenSource for SystemTokenSource {
    fn fresh_token(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        bytes
    }

    fn fresh_id(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        bytes
    }

    fn fresh_code(&self) -> String {
        let n = rand::rngs::OsRng.next_u32() % 1_000_000;
        format!("{n:06}")
    }
}
