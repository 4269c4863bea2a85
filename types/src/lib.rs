//! Shared domain types for the porch verification engine.
//!
//! Everything here is plain data: identifiers, enumerations, journal event
//! records and the derived snapshot. Behaviour lives in the crates that
//! consume these types (`porch_scoring`, `porch_store`, `porch_protocols`,
//! `porch_orchestrator`).

pub mod completion;
pub mod error;
pub mod event;
pub mod ids;
pub mod method;
pub mod params;
pub mod state;
pub mod subject;
pub mod time;
pub mod verifier;

pub use completion::MethodCompletion;
pub use error::TypeError;
pub use event::{EventData, EventKind, MethodParams, VerificationEvent};
pub use ids::{CommandId, ProtocolRunId};
pub use method::{Level, VerificationMethod};
pub use params::EngineParams;
pub use state::{ProtocolRun, ProtocolState, SubjectSnapshot};
pub use subject::{SubjectClass, SubjectId};
pub use time::Timestamp;
pub use verifier::{CredentialKind, VerifierRecord};
