//! External collaborator interfaces consumed by the engine.
//!
//! The engine never implements delivery or review itself; it calls these
//! traits and treats every call as a retryable side effect. Handles are
//! passed in at construction, never reached through globals.

use std::sync::Arc;

use thiserror::Error;

use porch_types::{Level, SubjectId, Timestamp, VerificationMethod};

#[derive(Debug, Error)]
#[error("collaborator unavailable: {0}")]
pub struct CollaboratorError(pub String);

/// Something a subject should hear about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    LevelChanged {
        subject: SubjectId,
        old: Level,
        new: Level,
        score: u32,
    },
    /// A verifier's confirmation was rolled back by saga compensation.
    ConfirmationRevoked {
        subject: SubjectId,
        verifier: SubjectId,
    },
}

/// Notification delivery. At-least-once is acceptable; the engine never
/// blocks a state transition on delivery success.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), CollaboratorError>;
}

/// Challenge-code delivery (email / SMS backends).
pub trait CodeDelivery: Send + Sync {
    fn send(&self, target: &str, code: &str, ttl_secs: u64) -> Result<(), CollaboratorError>;
}

/// Document review queue.
pub trait ReviewQueue: Send + Sync {
    fn enqueue(
        &self,
        subject: SubjectId,
        method: VerificationMethod,
        blob_ref: &[u8],
    ) -> Result<(), CollaboratorError>;
}

/// Time source. Production uses [`SystemClock`]; tests inject the nullable
/// clock so expiry is driven programmatically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// The collaborator bundle handed to each orchestrator task. The token
/// source rides along so tests can swap OS randomness for the nullable
/// deterministic source.
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn NotificationSink>,
    pub delivery: Arc<dyn CodeDelivery>,
    pub review_queue: Arc<dyn ReviewQueue>,
    pub token_source: Arc<dyn porch_protocols::TokenSource>,
}
