//! Abstract storage traits for the verification engine.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the workspace depends only on the traits. This crate
//! also owns the journal→snapshot projection: folding a subject's event
//! journal through the scoring model is the one true way to derive state.

pub mod cache;
pub mod error;
pub mod journal;
pub mod meta;
pub mod projection;
pub mod registry;
pub mod token;
pub mod verifier;

pub use cache::SnapshotCache;
pub use error::StoreError;
pub use journal::JournalStore;
pub use meta::MetaStore;
pub use projection::{apply_event, finalize, fold_journal};
pub use registry::SubjectRegistry;
pub use token::{TokenRecord, TokenStore};
pub use verifier::VerifierStore;
