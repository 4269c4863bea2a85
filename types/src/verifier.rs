//! Verifier records: subjects authorized to attest to others' identities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::subject::SubjectId;
use crate::time::Timestamp;

/// A credential that can qualify a subject as a verifier.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CredentialKind {
    NotaryPublic,
    Attorney,
    CommunityLeader,
    VerifiedBusinessOwner,
    OrganizationDirector,
    GovernmentOfficial,
    /// Synthetic: held automatically once a verifier has 50 or more
    /// successful confirmations. Never stored, always derived.
    TrustedVerifier,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialKind::NotaryPublic => "notary_public",
            CredentialKind::Attorney => "attorney",
            CredentialKind::CommunityLeader => "community_leader",
            CredentialKind::VerifiedBusinessOwner => "verified_business_owner",
            CredentialKind::OrganizationDirector => "organization_director",
            CredentialKind::GovernmentOfficial => "government_official",
            CredentialKind::TrustedVerifier => "trusted_verifier",
        };
        write!(f, "{s}")
    }
}

/// Number of successful confirmations that grants the synthetic
/// `TrustedVerifier` credential.
pub const TRUSTED_VERIFIER_THRESHOLD: u32 = 50;

/// Profile of a subject who may verify others.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierRecord {
    pub subject_id: SubjectId,
    /// Stored credentials. `TrustedVerifier` is derived, not stored here.
    pub credentials: BTreeSet<CredentialKind>,
    pub authorized: bool,
    pub revoked_at: Option<Timestamp>,
    pub revocation_reason: Option<String>,
    pub successful_confirmations: u32,
}

impl VerifierRecord {
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            credentials: BTreeSet::new(),
            authorized: false,
            revoked_at: None,
            revocation_reason: None,
            successful_confirmations: 0,
        }
    }

    /// Stored credentials plus the synthetic `TrustedVerifier` when earned.
    pub fn effective_credentials(&self) -> BTreeSet<CredentialKind> {
        let mut creds = self.credentials.clone();
        if self.successful_confirmations >= TRUSTED_VERIFIER_THRESHOLD {
            creds.insert(CredentialKind::TrustedVerifier);
        }
        creds
    }
}
