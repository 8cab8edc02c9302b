//! Helpers for constructing pools in tests.

use krait_conda_types::{PackageRecord, RepoDataRecord};

use crate::pool::Pool;

pub(crate) enum PackageTweak {
    None,
    BuildNumber(u64),
    TrackFeatures(Vec<String>),
}

pub(crate) fn record(name: &str, version: &str, depends: Vec<&str>) -> RepoDataRecord {
    record_with(name, version, depends, PackageTweak::None)
}

pub(crate) fn record_with(
    name: &str,
    version: &str,
    depends: Vec<&str>,
    tweak: PackageTweak,
) -> RepoDataRecord {
    let mut package_record = PackageRecord::new(
        name.parse().unwrap(),
        version.parse().unwrap(),
        "",
    );
    package_record.depends = depends.into_iter().map(String::from).collect();
    match tweak {
        PackageTweak::None => {}
        PackageTweak::BuildNumber(number) => package_record.build_number = number,
        PackageTweak::TrackFeatures(features) => package_record.track_features = features,
    }
    let file_name = format!("{name}-{version}-0.tar.bz2");
    RepoDataRecord {
        url: format!("https://conda.anaconda.org/test/linux-64/{file_name}")
            .parse()
            .unwrap(),
        package_record,
        file_name,
        channel: Some("test".to_string()),
    }
}

/// Builds a single-repo pool from `(name, version, depends)` triples.
pub(crate) fn pool_from_packages(packages: &[(&str, &str, Vec<&str>)]) -> Pool {
    let mut pool = Pool::new();
    let repo = pool.new_repo("test", 0);
    for (name, version, depends) in packages {
        pool.add_solvable(repo, record(name, version, depends.clone()))
            .unwrap()
            .unwrap();
    }
    pool
}
