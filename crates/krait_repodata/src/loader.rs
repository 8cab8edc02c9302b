//! Populating a repo from `repodata.json`.

use std::path::{Path, PathBuf};

use krait_conda_types::{RepoData, RepoDataRecord};
use krait_solve::{Pool, PoolError, RepoId};
use thiserror::Error;
use url::Url;

/// Options controlling how a repo is loaded into the pool.
#[derive(Debug, Clone)]
pub struct RepoOptions {
    /// The priority of the repo; higher wins under strict channel priority.
    pub priority: i32,

    /// Give every `python >= 2` record a `pip` dependency and every `pip`
    /// record a `python` dependency, the way conda does when
    /// `add_pip_as_python_dependency` is configured.
    pub add_pip_as_python_dependency: bool,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            add_pip_as_python_dependency: false,
        }
    }
}

/// An error raised while loading repodata into the pool.
#[derive(Debug, Error)]
pub enum LoadRepoDataError {
    /// The repodata file could not be read.
    #[error("failed to read repodata from {}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    /// The repodata file is not valid repodata JSON.
    #[error("failed to parse repodata from {}", .0.display())]
    Parse(PathBuf, #[source] serde_json::Error),

    /// A record carried an invalid dependency spec.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Parses `repodata.json` at `path` and loads it as one repo, tagging every
/// record with the channel it came from. The repo is internalized before it
/// is returned.
pub fn load_repo_from_json(
    pool: &mut Pool,
    path: &Path,
    channel_name: &str,
    base_url: &Url,
    options: &RepoOptions,
) -> Result<RepoId, LoadRepoDataError> {
    let content = fs_err::read_to_string(path)
        .map_err(|err| LoadRepoDataError::Io(path.to_path_buf(), err))?;
    let repo_data: RepoData = serde_json::from_str(&content)
        .map_err(|err| LoadRepoDataError::Parse(path.to_path_buf(), err))?;

    let mut records = repo_data.into_records(channel_name, base_url);
    if options.add_pip_as_python_dependency {
        for record in &mut records {
            add_pip_to_record(record);
        }
    }

    add_records_as_repo(pool, channel_name, options.priority, records)
}

/// Adds an already-assembled record list as a repo; shared between the JSON
/// loader and the binary cache.
pub(crate) fn add_records_as_repo(
    pool: &mut Pool,
    channel_name: &str,
    priority: i32,
    records: Vec<RepoDataRecord>,
) -> Result<RepoId, LoadRepoDataError> {
    let repo_id = pool.new_repo(channel_name, priority);
    for record in records {
        pool.add_solvable(repo_id, record)?
            .expect("a freshly created repo cannot be internalized");
    }
    pool.internalize(repo_id);
    Ok(repo_id)
}

/// The `add_pip_as_python_dependency` rule. The `>= 2` guard on python
/// matches conda's behavior.
fn add_pip_to_record(record: &mut RepoDataRecord) {
    let package = &mut record.package_record;
    match package.name.as_normalized() {
        "python" => {
            let is_v2_or_later = package
                .version
                .as_major_minor()
                .map_or(package.version.epoch() > 0, |(major, _)| major >= 2);
            if is_v2_or_later && !package.depends.iter().any(|dep| dep.starts_with("pip")) {
                package.depends.push("pip".to_string());
            }
        }
        "pip" => {
            if !package.depends.iter().any(|dep| dep.starts_with("python")) {
                // Listed first so dependency ordering breaks the cycle in
                // python's favor.
                package.depends.insert(0, "python".to_string());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::PackageRecord;

    fn record(name: &str, version: &str, depends: &[&str]) -> RepoDataRecord {
        let mut package_record =
            PackageRecord::new(name.parse().unwrap(), version.parse().unwrap(), "0");
        package_record.depends = depends.iter().map(|s| s.to_string()).collect();
        RepoDataRecord {
            url: format!("https://conda.anaconda.org/test/noarch/{name}-{version}-0.conda")
                .parse()
                .unwrap(),
            file_name: format!("{name}-{version}-0.conda"),
            package_record,
            channel: Some("test".to_string()),
        }
    }

    #[test]
    fn test_pip_is_added_to_modern_python_only() {
        let mut python3 = record("python", "3.9.0", &[]);
        add_pip_to_record(&mut python3);
        assert_eq!(python3.package_record.depends, ["pip"]);

        let mut python1 = record("python", "1.5", &[]);
        add_pip_to_record(&mut python1);
        assert!(python1.package_record.depends.is_empty());

        // An existing pip constraint is left alone.
        let mut pinned = record("python", "3.9.0", &["pip >=20"]);
        add_pip_to_record(&mut pinned);
        assert_eq!(pinned.package_record.depends, ["pip >=20"]);
    }

    #[test]
    fn test_python_is_added_to_pip() {
        let mut pip = record("pip", "22.0", &["setuptools"]);
        add_pip_to_record(&mut pip);
        assert_eq!(pip.package_record.depends, ["python", "setuptools"]);
    }

    #[test]
    fn test_load_tags_records_with_the_channel() {
        let repodata = r#"{
            "packages": {
                "foo-1.0-0.tar.bz2": {"name": "foo", "version": "1.0", "build": "0"}
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repodata.json");
        std::fs::write(&path, repodata).unwrap();

        let mut pool = Pool::new();
        let base_url = "https://conda.anaconda.org/conda-forge/linux-64"
            .parse()
            .unwrap();
        let repo_id = load_repo_from_json(
            &mut pool,
            &path,
            "conda-forge",
            &base_url,
            &RepoOptions::default(),
        )
        .unwrap();

        let solvables = pool.repo_solvables(repo_id);
        assert_eq!(solvables.len(), 1);
        let record = pool.resolve_solvable(solvables[0]).record();
        assert_eq!(record.channel.as_deref(), Some("conda-forge"));
    }
}
