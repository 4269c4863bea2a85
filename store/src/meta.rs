//! Engine metadata storage (checkpoint markers, schema bookkeeping).

use crate::StoreError;

/// Small keyed byte store for engine metadata.
pub trait MetaStore: Send + Sync {
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// `Ok(None)` when the key has never been written.
    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Meta key holding the seq of a subject's latest checkpoint marker.
pub fn checkpoint_key(subject: porch_types::SubjectId) -> String {
    format!("checkpoint/{subject}")
}
