//! The method scoring table.
//!
//! One row per verification method. Point values, multipliers and decay
//! periods here are authoritative for the whole engine; deployments read
//! them through [`method_score`] rather than re-stating them.

use serde::{Deserialize, Serialize};

use porch_types::{SubjectClass, VerificationMethod};

/// Relative effort of completing a method, used to rank suggested paths.
///
/// Ascending: automatic checks cost nothing, in-person meetups cost the most.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Effort {
    Automatic,
    CodeChallenge,
    Attestation,
    DocumentReview,
    InPerson,
}

impl Effort {
    pub fn rank(&self) -> u32 {
        *self as u32
    }
}

/// Static scoring attributes of one verification method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MethodScore {
    pub method: VerificationMethod,
    pub base_points: u32,
    /// How many distinct completions count toward the score (≥ 1).
    pub max_multiplier: u32,
    /// Days until a completion stops contributing. 0 = never expires.
    pub decay_days: u32,
    pub requires_human_review: bool,
    pub applicable_to: &'static [SubjectClass],
    pub effort: Effort,
}

const ALL: &[SubjectClass] = &[
    SubjectClass::Individual,
    SubjectClass::Business,
    SubjectClass::Organization,
];
const I: &[SubjectClass] = &[SubjectClass::Individual];
const B: &[SubjectClass] = &[SubjectClass::Business];
const O: &[SubjectClass] = &[SubjectClass::Organization];
const IB: &[SubjectClass] = &[SubjectClass::Individual, SubjectClass::Business];
const BO: &[SubjectClass] = &[SubjectClass::Business, SubjectClass::Organization];

macro_rules! row {
    ($method:ident, $base:expr, $mult:expr, $decay:expr, $review:expr, $classes:expr, $effort:ident) => {
        MethodScore {
            method: VerificationMethod::$method,
            base_points: $base,
            max_multiplier: $mult,
            decay_days: $decay,
            requires_human_review: $review,
            applicable_to: $classes,
            effort: Effort::$effort,
        }
    };
}

/// The scoring table, in [`VerificationMethod`] enum order.
#[rustfmt::skip]
pub const METHOD_SCORES: [MethodScore; 23] = [
    row!(Email,                30, 1, 365, false, ALL, CodeChallenge),
    row!(Phone,                30, 1, 365, false, ALL, CodeChallenge),
    row!(TwoPartyInPerson,    150, 1,   0, false, I,   InPerson),
    row!(GovernmentId,        100, 1,   0, true,  I,   DocumentReview),
    row!(Biometric,           120, 1,   0, true,  I,   InPerson),
    row!(PersonalReference,    50, 3,   0, false, I,   Attestation),
    row!(CommunityAttestation, 40, 2,   0, false, I,   Attestation),
    row!(PlatformHistory,      30, 1, 365, false, ALL, Automatic),
    row!(TransactionHistory,   30, 1, 365, false, ALL, Automatic),
    row!(BusinessLicense,     120, 1,   0, true,  B,   DocumentReview),
    row!(TaxId,               120, 1,   0, true,  BO,  DocumentReview),
    row!(BusinessAddress,      60, 1, 365, true,  B,   DocumentReview),
    row!(OwnerVerification,   100, 1,   0, false, B,   InPerson),
    row!(BusinessInsurance,    50, 1, 365, true,  B,   DocumentReview),
    row!(ProfessionalLicense,  80, 1, 365, true,  IB,  DocumentReview),
    row!(BusinessReference,    40, 3,   0, false, B,   Attestation),
    row!(CommunityEndorsement, 40, 2,   0, false, BO,  Attestation),
    row!(NonprofitStatus,     120, 1,   0, true,  O,   DocumentReview),
    row!(OrgBylaws,            60, 1,   0, true,  O,   DocumentReview),
    row!(BoardVerification,   100, 1,   0, false, O,   InPerson),
    row!(MissionAlignment,     40, 1,   0, true,  O,   DocumentReview),
    row!(OrgReference,         40, 3,   0, false, O,   Attestation),
    row!(NotaryVerification,  110, 1,   0, false, ALL, InPerson),
];

/// Look up the scoring row for a method.
pub fn method_score(method: VerificationMethod) -> &'static MethodScore {
    let row = &METHOD_SCORES[method as usize];
    debug_assert_eq!(row.method, method, "scoring table out of enum order");
    row
}
