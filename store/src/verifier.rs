//! Verifier record storage.

use porch_types::{SubjectId, VerifierRecord};

use crate::StoreError;

/// Keyed store of verifier profiles.
///
/// `add_confirmations` is an atomic read-modify-write; it is only ever
/// invoked from the verifier's own orchestration path, never concurrently
/// cross-written (the saga record/compensation steps are serialized per
/// run).
pub trait VerifierStore: Send + Sync {
    fn get(&self, id: SubjectId) -> Result<Option<VerifierRecord>, StoreError>;

    fn put(&self, record: &VerifierRecord) -> Result<(), StoreError>;

    /// Adjust `successful_confirmations` by `delta` (saturating at zero) and
    /// return the new value. Fails with `NotFound` for unknown verifiers.
    fn add_confirmations(&self, id: SubjectId, delta: i32) -> Result<u32, StoreError>;
}
