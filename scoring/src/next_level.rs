//! Next-level path suggestions.
//!
//! Given a subject's current score and completion counts, compute the next
//! level, the points still needed, and a short ranked list of method
//! combinations that would close the gap.

use std::collections::BTreeMap;

use porch_types::{Level, SubjectClass, VerificationMethod};

use crate::score::level;
use crate::table::method_score;

/// Largest combination size tried before falling back to "everything left".
const MAX_PATH_LEN: usize = 3;
/// How many suggested paths to return.
const MAX_PATHS: usize = 5;

/// What it takes to reach the next verification level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NextLevelInfo {
    /// `None` when already at the top level.
    pub target_level: Option<Level>,
    pub points_needed: u32,
    /// Up to five method combinations whose added points close the gap,
    /// cheapest (points, then effort) first.
    pub suggested_paths: Vec<Vec<VerificationMethod>>,
}

/// Remaining capacity of one method: how many more points it can add.
#[derive(Clone, Copy)]
struct Candidate {
    method: VerificationMethod,
    available_points: u32,
    effort_rank: u32,
}

/// Compute the next level and suggested paths toward it.
///
/// `completed` maps methods to their current effective completion counts.
/// Suggestions only include methods applicable to `class` that have
/// multiplier capacity left; ranking is total-points ascending, then total
/// effort ascending, then lexicographic on method enum order.
pub fn next_level(
    score: u32,
    class: SubjectClass,
    completed: &BTreeMap<VerificationMethod, u32>,
) -> NextLevelInfo {
    let current = level(score);
    let Some(target) = current.next() else {
        return NextLevelInfo {
            target_level: None,
            points_needed: 0,
            suggested_paths: Vec::new(),
        };
    };
    let needed = target.threshold().saturating_sub(score);

    let candidates: Vec<Candidate> = VerificationMethod::ALL
        .into_iter()
        .filter_map(|method| {
            let row = method_score(method);
            if !row.applicable_to.contains(&class) {
                return None;
            }
            let done = completed.get(&method).copied().unwrap_or(0);
            let slots = row.max_multiplier.saturating_sub(done);
            if slots == 0 {
                return None;
            }
            Some(Candidate {
                method,
                available_points: slots * row.base_points,
                effort_rank: row.effort.rank(),
            })
        })
        .collect();

    let mut paths: Vec<(u32, u32, Vec<VerificationMethod>)> = Vec::new();
    let mut combo: Vec<usize> = Vec::new();
    collect_paths(&candidates, needed, 0, &mut combo, &mut paths);

    if paths.is_empty() {
        // No small combination closes the gap; offer everything that's left
        // if even that is enough.
        let total: u32 = candidates.iter().map(|c| c.available_points).sum();
        if total >= needed && !candidates.is_empty() {
            let effort = candidates.iter().map(|c| c.effort_rank).sum();
            paths.push((total, effort, candidates.iter().map(|c| c.method).collect()));
        }
    }

    paths.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
    paths.truncate(MAX_PATHS);

    NextLevelInfo {
        target_level: Some(target),
        points_needed: needed,
        suggested_paths: paths.into_iter().map(|(_, _, methods)| methods).collect(),
    }
}

/// Depth-first enumeration of method combinations up to `MAX_PATH_LEN`.
/// Candidates are in enum order, so emitted paths are too.
fn collect_paths(
    candidates: &[Candidate],
    needed: u32,
    start: usize,
    combo: &mut Vec<usize>,
    out: &mut Vec<(u32, u32, Vec<VerificationMethod>)>,
) {
    let sum: u32 = combo.iter().map(|&i| candidates[i].available_points).sum();
    if !combo.is_empty() && sum >= needed {
        let effort = combo.iter().map(|&i| candidates[i].effort_rank).sum();
        let methods = combo.iter().map(|&i| candidates[i].method).collect();
        out.push((sum, effort, methods));
        // A superset would only cost more; stop extending this combination.
        return;
    }
    if combo.len() == MAX_PATH_LEN {
        return;
    }
    for i in start..candidates.len() {
        combo.push(i);
        collect_paths(candidates, needed, i + 1, combo, out);
        combo.pop();
    }
}
