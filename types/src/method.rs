//! Verification methods and the derived verification level.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A concrete identity-verification method.
///
/// Closed enumeration; adding a method means adding a row to the scoring
/// table in `porch_scoring`. Enum order is the deterministic tie-break used
/// when ranking suggested paths, so keep the order stable.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum VerificationMethod {
    Email,
    Phone,
    TwoPartyInPerson,
    GovernmentId,
    Biometric,
    PersonalReference,
    CommunityAttestation,
    PlatformHistory,
    TransactionHistory,
    BusinessLicense,
    TaxId,
    BusinessAddress,
    OwnerVerification,
    BusinessInsurance,
    ProfessionalLicense,
    BusinessReference,
    CommunityEndorsement,
    NonprofitStatus,
    OrgBylaws,
    BoardVerification,
    MissionAlignment,
    OrgReference,
    NotaryVerification,
}

impl VerificationMethod {
    pub const ALL: [VerificationMethod; 23] = [
        VerificationMethod::Email,
        VerificationMethod::Phone,
        VerificationMethod::TwoPartyInPerson,
        VerificationMethod::GovernmentId,
        VerificationMethod::Biometric,
        VerificationMethod::PersonalReference,
        VerificationMethod::CommunityAttestation,
        VerificationMethod::PlatformHistory,
        VerificationMethod::TransactionHistory,
        VerificationMethod::BusinessLicense,
        VerificationMethod::TaxId,
        VerificationMethod::BusinessAddress,
        VerificationMethod::OwnerVerification,
        VerificationMethod::BusinessInsurance,
        VerificationMethod::ProfessionalLicense,
        VerificationMethod::BusinessReference,
        VerificationMethod::CommunityEndorsement,
        VerificationMethod::NonprofitStatus,
        VerificationMethod::OrgBylaws,
        VerificationMethod::BoardVerification,
        VerificationMethod::MissionAlignment,
        VerificationMethod::OrgReference,
        VerificationMethod::NotaryVerification,
    ];

    /// Stable snake_case name used in logs and journal payload debugging.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMethod::Email => "email",
            VerificationMethod::Phone => "phone",
            VerificationMethod::TwoPartyInPerson => "two_party_in_person",
            VerificationMethod::GovernmentId => "government_id",
            VerificationMethod::Biometric => "biometric",
            VerificationMethod::PersonalReference => "personal_reference",
            VerificationMethod::CommunityAttestation => "community_attestation",
            VerificationMethod::PlatformHistory => "platform_history",
            VerificationMethod::TransactionHistory => "transaction_history",
            VerificationMethod::BusinessLicense => "business_license",
            VerificationMethod::TaxId => "tax_id",
            VerificationMethod::BusinessAddress => "business_address",
            VerificationMethod::OwnerVerification => "owner_verification",
            VerificationMethod::BusinessInsurance => "business_insurance",
            VerificationMethod::ProfessionalLicense => "professional_license",
            VerificationMethod::BusinessReference => "business_reference",
            VerificationMethod::CommunityEndorsement => "community_endorsement",
            VerificationMethod::NonprofitStatus => "nonprofit_status",
            VerificationMethod::OrgBylaws => "org_bylaws",
            VerificationMethod::BoardVerification => "board_verification",
            VerificationMethod::MissionAlignment => "mission_alignment",
            VerificationMethod::OrgReference => "org_reference",
            VerificationMethod::NotaryVerification => "notary_verification",
        }
    }
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The qualitative verification band derived from the trust score.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Level {
    Unverified,
    Minimal,
    Standard,
    Enhanced,
    Complete,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Unverified,
        Level::Minimal,
        Level::Standard,
        Level::Enhanced,
        Level::Complete,
    ];

    /// Minimum trust score for this level. A score exactly at the threshold
    /// reaches the level.
    pub fn threshold(&self) -> u32 {
        match self {
            Level::Unverified => 0,
            Level::Minimal => 100,
            Level::Standard => 250,
            Level::Enhanced => 400,
            Level::Complete => 600,
        }
    }

    /// The next level up, if any.
    pub fn next(&self) -> Option<Level> {
        match self {
            Level::Unverified => Some(Level::Minimal),
            Level::Minimal => Some(Level::Standard),
            Level::Standard => Some(Level::Enhanced),
            Level::Enhanced => Some(Level::Complete),
            Level::Complete => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Unverified => "unverified",
            Level::Minimal => "minimal",
            Level::Standard => "standard",
            Level::Enhanced => "enhanced",
            Level::Complete => "complete",
        };
        write!(f, "{s}")
    }
}
