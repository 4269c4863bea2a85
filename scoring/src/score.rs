//! Score and level computation.

use std::collections::BTreeMap;

use porch_types::{Level, MethodCompletion, SubjectClass, Timestamp, VerificationMethod};

use crate::table::method_score;

/// Whether `method` counts toward the score of a subject of `class`.
pub fn applicable(method: VerificationMethod, class: SubjectClass) -> bool {
    method_score(method).applicable_to.contains(&class)
}

/// The per-method completion cap.
pub fn max_multiplier(method: VerificationMethod) -> u32 {
    method_score(method).max_multiplier
}

/// Whether a completion has decayed at `now`. Revocation is a separate
/// concern; a revoked-but-unexpired completion is not "expired".
pub fn is_expired(completion: &MethodCompletion, now: Timestamp) -> bool {
    match completion.expires_at {
        Some(exp) => now > exp,
        None => false,
    }
}

/// Trust score: for each applicable method, effective completions capped at
/// the multiplier, times base points. Completions of non-applicable methods
/// contribute nothing.
pub fn score(
    completions: &BTreeMap<VerificationMethod, Vec<MethodCompletion>>,
    class: SubjectClass,
    now: Timestamp,
) -> u32 {
    completions
        .iter()
        .filter(|(&method, _)| applicable(method, class))
        .map(|(&method, list)| {
            let effective = list.iter().filter(|c| c.is_effective(now)).count() as u32;
            effective.min(max_multiplier(method)) * method_score(method).base_points
        })
        .sum()
}

/// The highest level whose threshold the score meets. A score exactly at a
/// threshold reaches that level.
pub fn level(score: u32) -> Level {
    Level::ALL
        .into_iter()
        .rev()
        .find(|l| score >= l.threshold())
        .unwrap_or(Level::Unverified)
}
