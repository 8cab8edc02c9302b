//! Ordering of link and unlink steps.
//!
//! Linking follows the dependency DAG bottom-up so that a package is only
//! linked once everything it depends on is present; in particular `python`
//! is linked before every package whose dependency closure contains it,
//! which noarch-python path rewriting and pyc compilation rely on.
//! Unlinking uses the reverse order so dependents disappear before their
//! dependencies (and python goes last).

use std::collections::{HashMap, HashSet};

use krait_conda_types::{MatchSpec, PackageRecord};

/// Returns the indices of `records` in link order: dependencies first, with
/// the stable tie-break `(name, build number desc, timestamp desc)` among
/// unordered packages. Cycles (python ↔ pip) are broken in favor of the
/// node more packages depend on.
pub fn link_order<T: AsRef<PackageRecord>>(records: &[T]) -> Vec<usize> {
    let records: Vec<&PackageRecord> = records.iter().map(AsRef::as_ref).collect();

    let index_by_name: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| (record.name.as_normalized(), idx))
        .collect();

    // dependencies[i] = indices i depends on (within the record set).
    let mut dependencies: Vec<HashSet<usize>> = vec![HashSet::new(); records.len()];
    let mut dependents: Vec<usize> = vec![0; records.len()];
    for (idx, record) in records.iter().enumerate() {
        for dep in &record.depends {
            let Some(name) = dependency_name(dep) else {
                continue;
            };
            if let Some(&dep_idx) = index_by_name.get(name.as_str()) {
                if dep_idx != idx && dependencies[idx].insert(dep_idx) {
                    dependents[dep_idx] += 1;
                }
            }
        }
    }

    // Kahn's algorithm with deterministic extraction.
    let mut remaining: Vec<usize> = (0..records.len()).collect();
    let mut placed: HashSet<usize> = HashSet::new();
    let mut order = Vec::with_capacity(records.len());

    while !remaining.is_empty() {
        let mut ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&idx| dependencies[idx].iter().all(|dep| placed.contains(dep)))
            .collect();

        let next = if ready.is_empty() {
            // A dependency cycle; pick the node the most packages depend
            // on (python wins over pip), then fall back to the stable
            // tie-break.
            let mut cyclic = remaining.clone();
            cyclic.sort_by(|&a, &b| {
                dependents[b]
                    .cmp(&dependents[a])
                    .then_with(|| stable_tie_break(records[a], records[b]))
            });
            cyclic[0]
        } else {
            ready.sort_by(|&a, &b| stable_tie_break(records[a], records[b]));
            ready[0]
        };

        placed.insert(next);
        remaining.retain(|&idx| idx != next);
        order.push(next);
    }

    order
}

/// Returns the indices of `records` in unlink order: dependents first, so
/// that no package outlives something that needs it.
pub fn unlink_order<T: AsRef<PackageRecord>>(records: &[T]) -> Vec<usize> {
    let mut order = link_order(records);
    order.reverse();
    order
}

fn stable_tie_break(a: &PackageRecord, b: &PackageRecord) -> std::cmp::Ordering {
    a.name
        .cmp(&b.name)
        .then_with(|| b.build_number.cmp(&a.build_number))
        .then_with(|| b.timestamp.cmp(&a.timestamp))
}

/// The package name of a dependency spec; falls back to the first token when
/// the spec does not parse.
fn dependency_name(dep: &str) -> Option<String> {
    if let Ok(spec) = dep.parse::<MatchSpec>() {
        return spec.name.map(|name| name.as_normalized().to_string());
    }
    dep.split_whitespace().next().map(str::to_lowercase)
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::PackageRecord;

    fn record(name: &str, depends: &[&str]) -> PackageRecord {
        let mut record = PackageRecord::new(name.parse().unwrap(), "1.0".parse().unwrap(), "0");
        record.depends = depends.iter().map(|s| s.to_string()).collect();
        record
    }

    fn names(records: &[PackageRecord], order: &[usize]) -> Vec<String> {
        order
            .iter()
            .map(|&idx| records[idx].name.as_normalized().to_string())
            .collect()
    }

    #[test]
    fn test_python_links_before_its_dependents() {
        let records = vec![
            record("numpy", &["python >=3.9", "libblas"]),
            record("python", &["openssl"]),
            record("libblas", &[]),
            record("openssl", &[]),
        ];
        let order = names(&records, &link_order(&records));

        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(position("openssl") < position("python"));
        assert!(position("python") < position("numpy"));
        assert!(position("libblas") < position("numpy"));
    }

    #[test]
    fn test_unlink_is_the_reverse() {
        let records = vec![record("python", &[]), record("numpy", &["python"])];
        let link = names(&records, &link_order(&records));
        let unlink = names(&records, &unlink_order(&records));
        assert_eq!(link, ["python", "numpy"]);
        assert_eq!(unlink, ["numpy", "python"]);
    }

    #[test]
    fn test_pip_cycle_is_broken_in_pythons_favor() {
        let records = vec![
            record("pip", &["python", "setuptools"]),
            record("python", &["pip"]),
            record("setuptools", &["python"]),
        ];
        let order = names(&records, &link_order(&records));
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(position("python") < position("pip"));
        assert!(position("python") < position("setuptools"));
    }

    #[test]
    fn test_unrelated_packages_sort_by_name() {
        let records = vec![record("zlib", &[]), record("bzip2", &[]), record("xz", &[])];
        let order = names(&records, &link_order(&records));
        assert_eq!(order, ["bzip2", "xz", "zlib"]);
    }
}
