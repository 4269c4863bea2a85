use std::collections::BTreeMap;

use proptest::prelude::*;

use porch_scoring::{applicable, level, max_multiplier, method_score, next_level, score};
use porch_types::{
    Level, MethodCompletion, SubjectClass, Timestamp, VerificationMethod,
};

fn arb_class() -> impl Strategy<Value = SubjectClass> {
    prop::sample::select(SubjectClass::ALL.to_vec())
}

fn arb_method() -> impl Strategy<Value = VerificationMethod> {
    prop::sample::select(VerificationMethod::ALL.to_vec())
}

fn completions_of(
    entries: Vec<(VerificationMethod, u32)>,
) -> BTreeMap<VerificationMethod, Vec<MethodCompletion>> {
    let mut map: BTreeMap<VerificationMethod, Vec<MethodCompletion>> = BTreeMap::new();
    for (method, count) in entries {
        let list = map.entry(method).or_default();
        for _ in 0..count {
            let index = list.len() as u32 + 1;
            list.push(MethodCompletion {
                method,
                sequence_index: index,
                completed_at: Timestamp::EPOCH,
                evidence_ref: Vec::new(),
                expires_at: None,
                revoked_at: None,
                revocation_reason: None,
            });
        }
    }
    map
}

proptest! {
    /// Level is non-decreasing in the score.
    #[test]
    fn level_is_monotone(a in 0u32..2_000, b in 0u32..2_000) {
        if a <= b {
            prop_assert!(level(a) <= level(b));
        }
    }

    /// A score at or above a threshold reaches at least that level.
    #[test]
    fn threshold_boundary_is_inclusive(l in prop::sample::select(Level::ALL.to_vec())) {
        prop_assert!(level(l.threshold()) >= l);
        if l.threshold() > 0 {
            prop_assert!(level(l.threshold() - 1) < l);
        }
    }

    /// Completions beyond the multiplier never increase the score.
    #[test]
    fn extra_completions_are_capped(
        method in arb_method(),
        class in arb_class(),
        extra in 1u32..5,
    ) {
        let cap = max_multiplier(method);
        let at_cap = score(&completions_of(vec![(method, cap)]), class, Timestamp::EPOCH);
        let over = score(&completions_of(vec![(method, cap + extra)]), class, Timestamp::EPOCH);
        prop_assert_eq!(at_cap, over);
    }

    /// Non-applicable methods contribute exactly zero.
    #[test]
    fn non_applicable_contributes_zero(method in arb_method(), class in arb_class()) {
        let s = score(&completions_of(vec![(method, 1)]), class, Timestamp::EPOCH);
        if applicable(method, class) {
            prop_assert_eq!(s, method_score(method).base_points);
        } else {
            prop_assert_eq!(s, 0);
        }
    }

    /// Score is additive over disjoint method sets.
    #[test]
    fn score_is_additive(
        a in arb_method(),
        b in arb_method(),
        class in arb_class(),
    ) {
        prop_assume!(a != b);
        let sa = score(&completions_of(vec![(a, 1)]), class, Timestamp::EPOCH);
        let sb = score(&completions_of(vec![(b, 1)]), class, Timestamp::EPOCH);
        let both = score(&completions_of(vec![(a, 1), (b, 1)]), class, Timestamp::EPOCH);
        prop_assert_eq!(both, sa + sb);
    }

    /// Every suggested path closes the published gap.
    #[test]
    fn suggested_paths_close_the_gap(s in 0u32..600, class in arb_class()) {
        let info = next_level(s, class, &BTreeMap::new());
        for path in &info.suggested_paths {
            let total: u32 = path
                .iter()
                .map(|&m| method_score(m).base_points * method_score(m).max_multiplier)
                .sum();
            prop_assert!(total >= info.points_needed);
        }
    }
}
