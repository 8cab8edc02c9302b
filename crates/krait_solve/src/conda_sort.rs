//! Ordering of equally-named candidates, following the rules conda uses.

use std::cmp::Ordering;

use ahash::AHashMap;
use krait_conda_types::Version;

use crate::{id::SolvableId, pool::Pool};

/// Compares two candidates of the same spec; `Less` means `a` is preferred.
///
/// The criteria, in order: absence of track features, highest version,
/// highest build number, dependency scoring (prefer the candidate whose
/// shared dependencies select higher versions), newest timestamp, channel
/// priority, and finally the lowest solvable id, which makes the whole order
/// deterministic for otherwise indistinguishable candidates.
pub(crate) fn compare_candidates(pool: &Pool, a: SolvableId, b: SolvableId) -> Ordering {
    let solvable_a = pool.resolve_solvable(a);
    let solvable_b = pool.resolve_solvable(b);
    let record_a = &solvable_a.record().package_record;
    let record_b = &solvable_b.record().package_record;

    // A candidate with track features is only picked when nothing without
    // them matches.
    let a_tracks = !record_a.track_features.is_empty();
    let b_tracks = !record_b.track_features.is_empty();
    match a_tracks.cmp(&b_tracks) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Higher versions first.
    match record_b.version.cmp(&record_a.version) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Higher build numbers first.
    match record_b.build_number.cmp(&record_a.build_number) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Prefer the candidate whose shared dependencies select the higher
    // versions.
    let mut total_score = 0i32;
    let b_specs_by_name: AHashMap<_, _> = solvable_b
        .dependencies()
        .iter()
        .map(|&dep| pool.resolve_spec(dep))
        .filter_map(|spec| spec.name.as_ref().map(|name| (name.as_normalized(), spec)))
        .collect();

    for &dep in solvable_a.dependencies() {
        let a_spec = pool.resolve_spec(dep);
        let Some(name) = a_spec.name.as_ref() else {
            continue;
        };
        let Some(&b_spec) = b_specs_by_name.get(name.as_normalized()) else {
            continue;
        };
        if a_spec == b_spec {
            continue;
        }

        let (Some((a_version, a_tracked)), Some((b_version, b_tracked))) = (
            find_highest_version(pool, a_spec),
            find_highest_version(pool, b_spec),
        ) else {
            continue;
        };

        // A dependency that can only be satisfied by tracked-feature
        // packages weighs heavily against its owner.
        match a_tracked.cmp(&b_tracked) {
            Ordering::Less => total_score -= 100,
            Ordering::Greater => total_score += 100,
            Ordering::Equal => {
                total_score += match b_version.cmp(&a_version) {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                }
            }
        }
    }
    match total_score.cmp(&0) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Newer timestamps first.
    match record_b.timestamp.cmp(&record_a.timestamp) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Higher-priority channels first.
    let priority_a = pool.repo_priority(solvable_a.repo_id());
    let priority_b = pool.repo_priority(solvable_b.repo_id());
    match priority_b.cmp(&priority_a) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // The documented deterministic tie break.
    a.cmp(&b)
}

/// Returns the highest version selected by `spec` and whether every matching
/// candidate carries track features.
pub(crate) fn find_highest_version(
    pool: &Pool,
    spec: &krait_conda_types::MatchSpec,
) -> Option<(Version, bool)> {
    let name_id = pool.find_package_name(spec.name.as_ref()?.as_normalized())?;
    let mut result: Option<(Version, bool)> = None;
    for &solvable_id in pool.solvables_by_name(name_id) {
        let record = &pool.resolve_solvable(solvable_id).record().package_record;
        if !spec.matches(record) {
            continue;
        }
        let tracked = !record.track_features.is_empty();
        result = Some(match result.take() {
            None => (record.version.clone(), tracked),
            Some((version, all_tracked)) => (
                version.max(record.version.clone()),
                all_tracked && tracked,
            ),
        });
    }
    result
}
