//! Derived per-subject state: the snapshot and active protocol runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::completion::MethodCompletion;
use crate::event::MethodParams;
use crate::ids::ProtocolRunId;
use crate::method::{Level, VerificationMethod};
use crate::subject::{SubjectClass, SubjectId};
use crate::time::Timestamp;

/// Lifecycle state of a protocol run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolState {
    Pending,
    Waiting,
    AwaitingReview,
    Completed,
    Failed,
    Cancelled,
    Compensating,
}

impl ProtocolState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolState::Completed | ProtocolState::Failed | ProtocolState::Cancelled
        )
    }
}

/// One execution of a child verification protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRun {
    pub id: ProtocolRunId,
    pub method: VerificationMethod,
    pub state: ProtocolState,
    pub started_at: Timestamp,
    pub deadline: Timestamp,
    pub params: MethodParams,
}

/// The derived view of a subject's verification state.
///
/// Always equal to the fold of the subject's journal through the scoring
/// model; any divergence is a corruption bug, not a state to repair around.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSnapshot {
    pub subject: SubjectId,
    pub class: SubjectClass,
    pub score: u32,
    pub level: Level,
    /// All recorded completions per method, including revoked and expired
    /// ones (they stay for audit; effectiveness is decided at read time).
    pub completions: BTreeMap<VerificationMethod, Vec<MethodCompletion>>,
    pub active_protocols: BTreeMap<VerificationMethod, ProtocolRun>,
    pub updated_at: Timestamp,
    /// Journal seq this snapshot reflects.
    pub last_seq: u64,
}

impl SubjectSnapshot {
    pub fn new(subject: SubjectId, class: SubjectClass) -> Self {
        Self {
            subject,
            class,
            score: 0,
            level: Level::Unverified,
            completions: BTreeMap::new(),
            active_protocols: BTreeMap::new(),
            updated_at: Timestamp::EPOCH,
            last_seq: 0,
        }
    }

    /// Completions of `method` that still contribute to the score at `now`.
    pub fn effective_completions(
        &self,
        method: VerificationMethod,
        now: Timestamp,
    ) -> impl Iterator<Item = &MethodCompletion> {
        self.completions
            .get(&method)
            .into_iter()
            .flatten()
            .filter(move |c| c.is_effective(now))
    }

    /// Count of effective completions of `method` at `now`.
    pub fn effective_count(&self, method: VerificationMethod, now: Timestamp) -> u32 {
        self.effective_completions(method, now).count() as u32
    }

    /// Map of method → effective completion count, omitting zero entries.
    pub fn completed_methods(&self, now: Timestamp) -> BTreeMap<VerificationMethod, u32> {
        self.completions
            .keys()
            .map(|&m| (m, self.effective_count(m, now)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }

    /// The earliest upcoming expiry across all effective completions.
    pub fn next_expiry(&self, now: Timestamp) -> Option<Timestamp> {
        self.completions
            .values()
            .flatten()
            .filter(|c| c.is_effective(now))
            .filter_map(|c| c.expires_at)
            .min()
    }
}
