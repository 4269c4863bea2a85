//! QR slot-token storage for the two-party in-person protocol.

use serde::{Deserialize, Serialize};

use porch_types::{ProtocolRunId, SubjectId, Timestamp};

use crate::StoreError;

/// A 256-bit slot token bound to one verifier slot of one protocol run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: [u8; 32],
    pub subject: SubjectId,
    pub run_id: ProtocolRunId,
    /// Verifier slot this token fills: 1 or 2.
    pub slot: u8,
    pub expires_at: Timestamp,
    pub invalidated: bool,
}

impl TokenRecord {
    /// Whether a confirmation with this token is still acceptable at `now`.
    pub fn is_live(&self, now: Timestamp) -> bool {
        !self.invalidated && now <= self.expires_at
    }
}

/// Key-value store of outstanding slot tokens.
///
/// Keys are the opaque token bytes; `put_if_absent` is an atomic CAS so two
/// concurrent issuers can never claim the same token value.
pub trait TokenStore: Send + Sync {
    /// Store a token; returns false (without overwriting) if it exists.
    fn put_if_absent(&self, record: &TokenRecord) -> Result<bool, StoreError>;

    fn get(&self, token: &[u8; 32]) -> Result<Option<TokenRecord>, StoreError>;

    /// Mark a token unusable. Idempotent; unknown tokens are a no-op.
    fn invalidate(&self, token: &[u8; 32]) -> Result<(), StoreError>;

    /// All tokens issued for one protocol run (reverse index; used when a
    /// run is restored after a restart).
    fn find_by_run(&self, run_id: ProtocolRunId) -> Result<Vec<TokenRecord>, StoreError>;
}
