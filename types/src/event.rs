//! Journal event records.
//!
//! The per-subject journal is the sole authoritative state: an append-only,
//! gap-free sequence of `VerificationEvent`s starting at `seq = 1`. The
//! snapshot is always reproducible by folding the journal.

use serde::{Deserialize, Serialize};

use crate::completion::MethodCompletion;
use crate::ids::{CommandId, ProtocolRunId};
use crate::method::{Level, VerificationMethod};
use crate::state::SubjectSnapshot;
use crate::subject::SubjectId;
use crate::time::Timestamp;

/// Discriminant of a journal event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    MethodStarted,
    MethodCompleted,
    MethodFailed,
    MethodRevoked,
    MethodExpired,
    LevelChanged,
    VerifierConfirmed,
    VerifierConfirmationRevoked,
    AttestationReceived,
    SnapshotRebuilt,
}

/// Method-specific parameters supplied when a method is started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodParams {
    /// Code challenge delivered to an email address.
    Email { address: String },
    /// Code challenge delivered to a phone number.
    Phone { number: String },
    /// Two-party in-person confirmation; tokens live in the token store.
    TwoParty,
    /// Human review of a document blob.
    Document { blob_ref: Vec<u8> },
    /// Attestation or reference intake.
    Attestation,
    /// Methods that need no parameters.
    None,
}

/// Salted code-hash material persisted with a code-challenge start so the
/// run can be restored after a restart without re-sending the code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChallengeSetup {
    pub code_hash: [u8; 32],
    pub salt: [u8; 16],
    pub code_expires_at: Timestamp,
    pub attempts_left: u32,
}

/// Structured payload of a journal event.
///
/// One variant per [`EventKind`]; the kind is derived, never stored twice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventData {
    MethodStarted {
        command_id: CommandId,
        deadline: Timestamp,
        params: MethodParams,
        challenge: Option<CodeChallengeSetup>,
    },
    MethodCompleted {
        completion: MethodCompletion,
    },
    MethodFailed {
        reason: String,
    },
    MethodRevoked {
        command_id: CommandId,
        sequence_index: u32,
        reason: String,
    },
    MethodExpired {
        sequence_index: u32,
    },
    LevelChanged {
        old: Level,
        new: Level,
        score: u32,
    },
    VerifierConfirmed {
        command_id: CommandId,
        evidence: Vec<u8>,
    },
    VerifierConfirmationRevoked,
    AttestationReceived {
        command_id: CommandId,
        text: String,
    },
    SnapshotRebuilt {
        snapshot: SubjectSnapshot,
    },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::MethodStarted { .. } => EventKind::MethodStarted,
            EventData::MethodCompleted { .. } => EventKind::MethodCompleted,
            EventData::MethodFailed { .. } => EventKind::MethodFailed,
            EventData::MethodRevoked { .. } => EventKind::MethodRevoked,
            EventData::MethodExpired { .. } => EventKind::MethodExpired,
            EventData::LevelChanged { .. } => EventKind::LevelChanged,
            EventData::VerifierConfirmed { .. } => EventKind::VerifierConfirmed,
            EventData::VerifierConfirmationRevoked => EventKind::VerifierConfirmationRevoked,
            EventData::AttestationReceived { .. } => EventKind::AttestationReceived,
            EventData::SnapshotRebuilt { .. } => EventKind::SnapshotRebuilt,
        }
    }
}

/// One element of a subject's journal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEvent {
    /// Monotonic, gap-free per subject, starting at 1.
    pub seq: u64,
    pub at: Timestamp,
    pub method: Option<VerificationMethod>,
    /// The other party that caused the event, when there is one
    /// (verifier, attestor, revoking actor).
    pub actor: Option<SubjectId>,
    pub protocol_run_id: Option<ProtocolRunId>,
    pub data: EventData,
}

impl VerificationEvent {
    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}
