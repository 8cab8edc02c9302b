//! The binary repodata cache.
//!
//! Loading a large `repodata.json` dominates solve startup, so after a JSON
//! load the flat record list is serialized to a compact MessagePack file next
//! to the JSON. The file starts with a magic tag and format version,
//! followed by a [`CacheHeader`] and the records. A cache is only usable when
//! its header matches the caller's expectation *exactly*; anything else is a
//! miss and the caller goes back to JSON.

use std::io::{Read, Write};
use std::path::Path;

use krait_conda_types::RepoDataRecord;
use krait_solve::{Pool, RepoId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::loader::{add_records_as_repo, LoadRepoDataError, RepoOptions};

const MAGIC: &[u8; 8] = b"KRAITRPD";
const FORMAT_VERSION: u32 = 1;

/// The validation tuple stored in front of the cached records. Any mismatch
/// between the stored and the expected header invalidates the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHeader {
    /// The version of the tool that wrote the cache.
    pub tool_version: String,

    /// The URL the repodata was fetched from.
    pub url: String,

    /// The HTTP `ETag` of the fetched repodata; may be empty.
    pub etag: String,

    /// The HTTP `Last-Modified` of the fetched repodata; may be empty.
    pub last_modified: String,

    /// Whether the pip↔python dependency rule was applied before caching.
    pub pip_added: bool,
}

/// The outcome of a cache probe.
pub enum CacheResult {
    /// The cache was valid; the repo has been added to the pool.
    Hit(RepoId),

    /// The cache is absent or was written for different repodata.
    Miss,
}

/// An error raised while reading or writing the binary cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache file could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The cache file exists but cannot be decoded.
    #[error("corrupt cache: {0}")]
    Corrupt(String),

    /// The decoded records were rejected by the pool.
    #[error(transparent)]
    Load(#[from] LoadRepoDataError),
}

/// Attempts to load a repo from the binary cache at `path`.
///
/// Returns [`CacheResult::Miss`] when the file does not exist or its header
/// does not match `expected`; undecodable content is an error so the caller
/// can warn before falling back to JSON.
pub fn load_from_cache(
    pool: &mut Pool,
    path: &Path,
    expected: &CacheHeader,
    options: &RepoOptions,
) -> Result<CacheResult, CacheError> {
    let mut file = match fs_err::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(CacheResult::Miss),
        Err(err) => return Err(err.into()),
    };

    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)
        .map_err(|_| CacheError::Corrupt("missing magic bytes".to_string()))?;
    if &magic != MAGIC {
        return Err(CacheError::Corrupt("wrong magic bytes".to_string()));
    }

    let mut deserializer = rmp_serde::Deserializer::new(&mut file);
    let format_version = u32::deserialize(&mut deserializer)
        .map_err(|err| CacheError::Corrupt(err.to_string()))?;
    if format_version != FORMAT_VERSION {
        tracing::debug!("repodata cache format {format_version} is not understood");
        return Ok(CacheResult::Miss);
    }

    let header = CacheHeader::deserialize(&mut deserializer)
        .map_err(|err| CacheError::Corrupt(err.to_string()))?;
    if &header != expected {
        return Ok(CacheResult::Miss);
    }

    let records = Vec::<RepoDataRecord>::deserialize(&mut deserializer)
        .map_err(|err| CacheError::Corrupt(err.to_string()))?;

    let repo_id = add_records_as_repo(pool, &channel_of(&records), options.priority, records)?;
    Ok(CacheResult::Hit(repo_id))
}

fn channel_of(records: &[RepoDataRecord]) -> String {
    records
        .first()
        .and_then(|record| record.channel.clone())
        .unwrap_or_default()
}

/// Serializes the solvables of `repo_id` to the cache file at `path`. The
/// write goes through a temporary file in the same directory and an atomic
/// rename.
pub fn write_cache(
    pool: &Pool,
    repo_id: RepoId,
    path: &Path,
    header: &CacheHeader,
) -> Result<(), CacheError> {
    let records: Vec<&RepoDataRecord> = pool
        .repo_solvables(repo_id)
        .iter()
        .map(|&solvable_id| pool.resolve_solvable(solvable_id).record())
        .collect();

    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    fs_err::create_dir_all(directory)?;
    let mut temp_file = tempfile::NamedTempFile::new_in(directory)?;
    {
        let writer = temp_file.as_file_mut();
        writer.write_all(MAGIC)?;
        let mut serializer = rmp_serde::Serializer::new(writer).with_struct_map();
        FORMAT_VERSION
            .serialize(&mut serializer)
            .map_err(|err| CacheError::Corrupt(err.to_string()))?;
        header
            .serialize(&mut serializer)
            .map_err(|err| CacheError::Corrupt(err.to_string()))?;
        records
            .serialize(&mut serializer)
            .map_err(|err| CacheError::Corrupt(err.to_string()))?;
    }
    temp_file
        .persist(path)
        .map_err(|err| CacheError::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::PackageRecord;

    fn header() -> CacheHeader {
        CacheHeader {
            tool_version: "0.1.0".to_string(),
            url: "https://conda.anaconda.org/test/linux-64/repodata.json".to_string(),
            etag: "\"abc\"".to_string(),
            last_modified: "Mon, 13 Feb 2023 13:49:56 GMT".to_string(),
            pip_added: true,
        }
    }

    fn populated_pool() -> (Pool, RepoId) {
        let mut pool = Pool::new();
        let repo = pool.new_repo("test", 0);
        let mut package_record = PackageRecord::new(
            "numpy".parse().unwrap(),
            "1.23.0".parse().unwrap(),
            "py39h1_0",
        );
        package_record.depends = vec!["python >=3.9".to_string()];
        pool.add_solvable(
            repo,
            RepoDataRecord {
                url: "https://conda.anaconda.org/test/linux-64/numpy-1.23.0-py39h1_0.conda"
                    .parse()
                    .unwrap(),
                file_name: "numpy-1.23.0-py39h1_0.conda".to_string(),
                package_record,
                channel: Some("test".to_string()),
            },
        )
        .unwrap()
        .unwrap();
        (pool, repo)
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repodata.solv");
        let (pool, repo) = populated_pool();
        write_cache(&pool, repo, &path, &header()).unwrap();

        let mut fresh = Pool::new();
        let result =
            load_from_cache(&mut fresh, &path, &header(), &RepoOptions::default()).unwrap();
        let CacheResult::Hit(repo_id) = result else {
            panic!("expected a cache hit");
        };
        let solvables = fresh.repo_solvables(repo_id);
        assert_eq!(solvables.len(), 1);
        let record = fresh.resolve_solvable(solvables[0]).record();
        assert_eq!(record.package_record.name.as_normalized(), "numpy");
        assert_eq!(record.package_record.depends, ["python >=3.9"]);
        assert_eq!(record.channel.as_deref(), Some("test"));
    }

    #[test]
    fn test_any_header_mismatch_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repodata.solv");
        let (pool, repo) = populated_pool();
        write_cache(&pool, repo, &path, &header()).unwrap();

        let mutations: [fn(&mut CacheHeader); 5] = [
            |h| h.tool_version = "9.9.9".to_string(),
            |h| h.url = "https://other.example.com/repodata.json".to_string(),
            |h| h.etag = String::new(),
            |h| h.last_modified = String::new(),
            |h| h.pip_added = false,
        ];
        for mutate in mutations {
            let mut expected = header();
            mutate(&mut expected);
            let mut fresh = Pool::new();
            let result =
                load_from_cache(&mut fresh, &path, &expected, &RepoOptions::default()).unwrap();
            assert!(matches!(result, CacheResult::Miss));
        }
    }

    #[test]
    fn test_missing_cache_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = Pool::new();
        let result = load_from_cache(
            &mut pool,
            &dir.path().join("nope.solv"),
            &header(),
            &RepoOptions::default(),
        )
        .unwrap();
        assert!(matches!(result, CacheResult::Miss));
    }

    #[test]
    fn test_garbage_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repodata.solv");
        std::fs::write(&path, b"KRAITRPD\xc1\xc1\xc1").unwrap();
        let mut pool = Pool::new();
        let result = load_from_cache(&mut pool, &path, &header(), &RepoOptions::default());
        assert!(matches!(result, Err(CacheError::Corrupt(_))));
    }
}
