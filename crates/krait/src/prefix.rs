//! Reading and creating environment prefixes.

use std::path::{Path, PathBuf};

use krait_conda_types::{History, PrefixRecord};
use thiserror::Error;

/// The directory whose existence marks a directory as a conda environment.
pub const MAGIC_DIRECTORY: &str = "conda-meta";

/// Errors raised while reading a prefix.
#[derive(Debug, Error)]
pub enum PrefixError {
    /// The directory exists and is non-empty but carries no `conda-meta`
    /// marker; refusing to treat it as an environment.
    #[error("'{}' exists but is not a conda environment", .0.display())]
    NotAnEnvironment(PathBuf),

    /// A `conda-meta/*.json` record failed to parse.
    #[error("invalid prefix record '{}'", .0.display())]
    InvalidRecord(PathBuf, #[source] std::io::Error),

    /// The prefix could not be read or created.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The installed state of one prefix: the parsed `conda-meta/*.json`
/// records. Mutation happens exclusively through the transaction engine.
#[derive(Debug)]
pub struct PrefixData {
    prefix: PathBuf,
    records: Vec<PrefixRecord>,
}

impl PrefixData {
    /// Loads the installed packages of a prefix.
    ///
    /// A missing directory or an empty one yields an empty record list so a
    /// first transaction can create the environment. An existing non-empty
    /// directory without the `conda-meta` marker is rejected.
    pub fn from_path(prefix: impl Into<PathBuf>) -> Result<Self, PrefixError> {
        let prefix = prefix.into();
        let conda_meta = prefix.join(MAGIC_DIRECTORY);

        if !conda_meta.is_dir() {
            if directory_has_entries(&prefix)? {
                return Err(PrefixError::NotAnEnvironment(prefix));
            }
            return Ok(Self {
                prefix,
                records: Vec::new(),
            });
        }

        let mut records = Vec::new();
        for entry in fs_err::read_dir(&conda_meta)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let record = PrefixRecord::from_path(&path)
                    .map_err(|err| PrefixError::InvalidRecord(path.clone(), err))?;
                records.push(record);
            }
        }
        records.sort_by(|a, b| {
            a.repodata_record
                .package_record
                .name
                .cmp(&b.repodata_record.package_record.name)
        });
        Ok(Self { prefix, records })
    }

    /// Creates the environment marker for a fresh prefix.
    pub fn init(prefix: impl Into<PathBuf>) -> Result<Self, PrefixError> {
        let prefix = prefix.into();
        fs_err::create_dir_all(prefix.join(MAGIC_DIRECTORY))?;
        Self::from_path(prefix)
    }

    /// The prefix directory.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// The installed records.
    pub fn records(&self) -> &[PrefixRecord] {
        &self.records
    }

    /// Consumes the data, returning the records.
    pub fn into_records(self) -> Vec<PrefixRecord> {
        self.records
    }

    /// The history journal of this prefix.
    pub fn history(&self) -> History {
        History::from_prefix(&self.prefix)
    }
}

fn directory_has_entries(path: &Path) -> Result<bool, std::io::Error> {
    match fs_err::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_missing_prefix_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let data = PrefixData::from_path(dir.path().join("env")).unwrap();
        assert!(data.records().is_empty());
    }

    #[test]
    fn test_foreign_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("some-file"), b"hello").unwrap();
        assert!(matches!(
            PrefixData::from_path(dir.path()),
            Err(PrefixError::NotAnEnvironment(_))
        ));
    }

    #[test]
    fn test_init_writes_the_magic_marker() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("env");
        PrefixData::init(&prefix).unwrap();
        assert!(prefix.join(MAGIC_DIRECTORY).is_dir());
        // A second load sees an (empty) environment.
        assert!(PrefixData::from_path(&prefix).unwrap().records().is_empty());
    }

    #[test]
    fn test_invalid_record_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let conda_meta = dir.path().join(MAGIC_DIRECTORY);
        std::fs::create_dir_all(&conda_meta).unwrap();
        std::fs::write(conda_meta.join("broken-1.0-0.json"), b"{").unwrap();
        assert!(matches!(
            PrefixData::from_path(dir.path()),
            Err(PrefixError::InvalidRecord(..))
        ));
    }
}
