//! Commands accepted by a subject orchestrator and their outcomes.

use serde::{Deserialize, Serialize};

use porch_types::{
    CommandId, Level, MethodParams, ProtocolRunId, ProtocolState, SubjectId, Timestamp,
    VerificationMethod,
};

/// A state-changing command for one subject.
///
/// Every command carries a caller-chosen [`CommandId`]; replays with the
/// same id return the original outcome and journal nothing new.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    StartMethod {
        method: VerificationMethod,
        params: MethodParams,
        command_id: CommandId,
    },
    /// The subject echoes back a delivered challenge code.
    EnterCode {
        method: VerificationMethod,
        code: String,
        command_id: CommandId,
    },
    /// A verifier confirms a two-party slot token. The gateway resolves the
    /// token to this subject before forwarding.
    VerifierConfirm {
        token: [u8; 32],
        verifier: SubjectId,
        evidence: Vec<u8>,
        command_id: CommandId,
    },
    /// An attestation for a reference-style method. `attestor_level` is the
    /// attestor's own snapshot level, resolved by the gateway.
    Attest {
        method: VerificationMethod,
        attestor: SubjectId,
        attestor_level: Level,
        text: String,
        command_id: CommandId,
    },
    /// The external review queue reports a decision.
    ReviewDecision {
        method: VerificationMethod,
        approved: bool,
        reason: Option<String>,
        command_id: CommandId,
    },
    Revoke {
        method: VerificationMethod,
        reason: String,
        actor: SubjectId,
        command_id: CommandId,
    },
    CancelMethod {
        method: VerificationMethod,
        command_id: CommandId,
    },
}

impl Command {
    pub fn command_id(&self) -> CommandId {
        match self {
            Command::StartMethod { command_id, .. }
            | Command::EnterCode { command_id, .. }
            | Command::VerifierConfirm { command_id, .. }
            | Command::Attest { command_id, .. }
            | Command::ReviewDecision { command_id, .. }
            | Command::Revoke { command_id, .. }
            | Command::CancelMethod { command_id, .. } => *command_id,
        }
    }
}

/// Successful result of a command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Started { run_id: ProtocolRunId },
    /// The challenge code matched and the method completed.
    CodeAccepted,
    /// Wrong code; the run stays live with this many attempts left.
    CodeRejected { attempts_left: u32 },
    /// The signal terminated the run without a completion.
    RunFailed { reason: String },
    /// A verifier confirmation was taken. `completed` is true once the
    /// second confirmation finished the whole saga.
    ConfirmationAccepted { completed: bool },
    AttestationAccepted { completed: bool },
    ReviewRecorded { completed: bool },
    Revoked { new_level: Level },
    Cancelled,
    /// Audit-only acknowledgement.
    Acknowledged,
}

/// Reply to the `MethodStatus` query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodStatus {
    pub completed_count: u32,
    pub active_state: Option<ProtocolState>,
    pub next_expiry: Option<Timestamp>,
}
