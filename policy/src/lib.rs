//! Verifier authorization policy.
//!
//! Pure over a verifier's record and verification level: no I/O. Rules are
//! evaluated in a fixed order and the first match wins.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use porch_types::{CredentialKind, Level, Timestamp, VerificationMethod, VerifierRecord};

/// Credentials that authorize a verifier regardless of their own
/// verification level.
const AUTO_QUALIFYING: [CredentialKind; 3] = [
    CredentialKind::NotaryPublic,
    CredentialKind::Attorney,
    CredentialKind::GovernmentOfficial,
];

/// Credentials accepted for the two-party in-person method.
const TWO_PARTY_CREDENTIALS: [CredentialKind; 7] = [
    CredentialKind::NotaryPublic,
    CredentialKind::Attorney,
    CredentialKind::CommunityLeader,
    CredentialKind::VerifiedBusinessOwner,
    CredentialKind::OrganizationDirector,
    CredentialKind::GovernmentOfficial,
    CredentialKind::TrustedVerifier,
];

/// A granted authorization, carrying what the caller needs for evidence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Effective credentials, including the synthetic trusted-verifier one.
    pub credentials: BTreeSet<CredentialKind>,
    pub successful_confirmations: u32,
}

/// Why a verifier may not attest.
///
/// The full reason-code vocabulary of the authorization contract.
/// `CredentialExpired` and `MethodNotSupported` are not produced by the
/// current rule chain; they belong to external credential validation,
/// which is not wired into the decision yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Denial {
    NotAVerifier,
    BelowMinimumLevel,
    Revoked,
    CredentialExpired,
    MethodNotSupported,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::NotAVerifier => "not_a_verifier",
            Denial::BelowMinimumLevel => "below_minimum_level",
            Denial::Revoked => "revoked",
            Denial::CredentialExpired => "credential_expired",
            Denial::MethodNotSupported => "method_not_supported",
        }
    }
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decide whether `record` may attest for `target_method`.
///
/// `level` is the verifier's own snapshot level. Pass `None` for `record`
/// when the subject has no verifier profile at all. The timestamp is part
/// of the contract for callers; none of the current rules consult it.
pub fn authorize(
    record: Option<&VerifierRecord>,
    level: Level,
    target_method: VerificationMethod,
    _now: Timestamp,
) -> Result<Authorization, Denial> {
    let record = record.ok_or(Denial::NotAVerifier)?;
    if !record.authorized {
        return Err(Denial::NotAVerifier);
    }

    if record.revoked_at.is_some() {
        return Err(Denial::Revoked);
    }

    let credentials = record.effective_credentials();

    let auto_qualified = AUTO_QUALIFYING.iter().any(|c| credentials.contains(c));
    if level < Level::Standard && !auto_qualified {
        return Err(Denial::BelowMinimumLevel);
    }

    if target_method == VerificationMethod::TwoPartyInPerson
        && !TWO_PARTY_CREDENTIALS.iter().any(|c| credentials.contains(c))
    {
        return Err(Denial::NotAVerifier);
    }

    Ok(Authorization {
        credentials,
        successful_confirmations: record.successful_confirmations,
    })
}
