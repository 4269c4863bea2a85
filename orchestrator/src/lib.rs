//! Per-subject verification orchestrator.
//!
//! [`subject::SubjectOrchestrator`] is the long-lived state machine that
//! owns a subject's snapshot, spawns and drives child protocols, journals
//! every transition and re-derives score and level. It performs no I/O:
//! commands produce [`subject::Transition`]s that the async runtime in
//! [`runtime`] persists, commits and executes side effects for.

pub mod collaborators;
pub mod command;
pub mod error;
pub mod runtime;
pub mod subject;

pub use collaborators::{
    Clock, CodeDelivery, CollaboratorError, Collaborators, Notification, NotificationSink,
    ReviewQueue, SystemClock,
};
pub use command::{Command, CommandOutcome, MethodStatus};
pub use error::CommandError;
pub use runtime::{spawn_subject, Stores, SubjectHandle};
pub use subject::{SubjectOrchestrator, Transition};
