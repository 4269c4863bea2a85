//! Record of a successfully completed verification method.

use serde::{Deserialize, Serialize};

use crate::method::VerificationMethod;
use crate::time::Timestamp;

/// A recorded successful execution of a method for one subject.
///
/// Immutable once written, except for the revocation fields. Whether a
/// completion still contributes to the trust score is decided at read time
/// from `expires_at` / `revoked_at` — completions are never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCompletion {
    pub method: VerificationMethod,
    /// 1-based index among completions of the same method, bounded by the
    /// method's max multiplier at award time.
    pub sequence_index: u32,
    pub completed_at: Timestamp,
    /// Opaque evidence for audit only (verifier ids, document hash, ...).
    pub evidence_ref: Vec<u8>,
    /// Present iff the method decays. `completed_at + decay_days`.
    pub expires_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub revocation_reason: Option<String>,
}

impl MethodCompletion {
    /// Whether this completion counts toward the score at `now`.
    ///
    /// The expiry boundary is inclusive: still valid at `now == expires_at`.
    pub fn is_effective(&self, now: Timestamp) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match self.expires_at {
            Some(exp) => now <= exp,
            None => true,
        }
    }
}
