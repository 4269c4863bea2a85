use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic-concurrency check failed; re-read and retry.
    #[error("append conflict: expected last seq {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("journal is corrupted: {0}")]
    Corruption(String),
}

impl StoreError {
    /// Whether a retry (with a fresh read for conflicts, backoff for
    /// backend errors) can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Backend(_))
    }
}
