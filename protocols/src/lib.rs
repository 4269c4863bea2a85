//! Child verification protocol state machines.
//!
//! Each protocol is a self-contained finite state machine that never
//! performs I/O itself: side effects are returned as [`Effect`] values for
//! the driving orchestrator to execute, and external happenings arrive as
//! explicit method calls (signals, deadline firings, cancellation). This
//! keeps every protocol deterministic and directly testable.

pub mod attestation;
pub mod child;
pub mod code_challenge;
pub mod common;
pub mod error;
pub mod human_review;
pub mod two_party;

pub use attestation::AttestationIntake;
pub use child::{protocol_kind, Child, ChildCancel, ChildDeadline, ProtocolKind};
pub use code_challenge::CodeChallenge;
pub use common::{Effect, FailureReason, Outcome, SystemTokenSource, TokenSource};
pub use error::ProtocolError;
pub use human_review::HumanReview;
pub use two_party::{ConfirmAck, SagaPhase, SagaProgress, TwoPartySaga};
