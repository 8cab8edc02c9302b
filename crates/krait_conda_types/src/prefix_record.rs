//! The on-disk record of an installed package
//! (`<prefix>/conda-meta/<name>-<version>-<build>.json`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{package::PathsJson, PackageRecord, RepoDataRecord};

/// The metadata of a package installed in a prefix: the repodata record it
/// was installed from plus everything that was learned while linking it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixRecord {
    /// The record of the package as it was solved, including provenance.
    #[serde(flatten)]
    pub repodata_record: RepoDataRecord,

    /// The path the archive was downloaded to, if it is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_tarball_full_path: Option<PathBuf>,

    /// The directory the archive was extracted to, if it is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_package_dir: Option<PathBuf>,

    /// The files that were linked into the prefix, relative to the prefix
    /// root. For noarch-python packages these differ from the paths inside
    /// the package.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Detailed information about every linked path, including the hash and
    /// size observed at link time.
    #[serde(default)]
    pub paths_data: PathsJson,

    /// The match spec that caused this package to be installed, when it was
    /// requested explicitly by the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_spec: Option<String>,

    /// How the package got into the prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,
}

/// Information about the link operation that installed a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// The directory the package was linked from.
    pub source: PathBuf,

    /// The materialization method that was used.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<LinkType>,
}

/// The numeric link-type encoding used by conda.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum LinkType {
    /// The file was copied.
    Copy = 1,
    /// The file is a hard link into the package cache.
    HardLink = 2,
    /// The file is a soft link.
    SoftLink = 3,
    /// An empty directory.
    Directory = 4,
}

impl PrefixRecord {
    /// Builds a prefix record from the solved repodata record and the
    /// link-time observations.
    pub fn from_repodata_record(
        repodata_record: RepoDataRecord,
        paths_data: PathsJson,
        requested_spec: Option<String>,
        link: Option<Link>,
    ) -> Self {
        Self {
            files: paths_data
                .paths
                .iter()
                .map(|entry| entry.relative_path.clone())
                .collect(),
            repodata_record,
            package_tarball_full_path: None,
            extracted_package_dir: None,
            paths_data,
            requested_spec,
            link,
        }
    }

    /// Parses a prefix record from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let content = fs_err::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes the record to the given path. `pretty` selects human readable
    /// output, which is what conda itself writes.
    pub fn write_to_path(
        &self,
        path: impl AsRef<Path>,
        pretty: bool,
    ) -> Result<(), std::io::Error> {
        if let Some(parent) = path.as_ref().parent() {
            fs_err::create_dir_all(parent)?;
        }
        let file = fs_err::File::create(path.as_ref())?;
        if pretty {
            serde_json::to_writer_pretty(file, self)?;
        } else {
            serde_json::to_writer(file, self)?;
        }
        Ok(())
    }

    /// The canonical filename of this record below `conda-meta/`.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.json",
            self.repodata_record.package_record.name.as_normalized(),
            self.repodata_record.package_record.version,
            self.repodata_record.package_record.build
        )
    }

    /// The distribution string used in the history journal
    /// (`channel::name-version-build` or `name-version-build`).
    pub fn dist_string(&self) -> String {
        let record = &self.repodata_record.package_record;
        let dist = format!(
            "{}-{}-{}",
            record.name.as_normalized(),
            record.version,
            record.build
        );
        match self.repodata_record.channel.as_deref() {
            Some(channel) if !channel.is_empty() => format!("{channel}::{dist}"),
            _ => dist,
        }
    }

    /// Loads all prefix records from the `conda-meta` directory of a prefix.
    pub fn collect_from_prefix(prefix: impl AsRef<Path>) -> Result<Vec<Self>, std::io::Error> {
        let conda_meta = prefix.as_ref().join("conda-meta");
        let mut records = Vec::new();
        for entry in fs_err::read_dir(conda_meta)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                records.push(Self::from_path(&path)?);
            }
        }
        // Directory iteration order is not deterministic.
        records.sort_by(|a, b| {
            a.repodata_record
                .package_record
                .name
                .cmp(&b.repodata_record.package_record.name)
        });
        Ok(records)
    }
}

impl AsRef<PackageRecord> for PrefixRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.repodata_record.package_record
    }
}

impl AsRef<RepoDataRecord> for PrefixRecord {
    fn as_ref(&self) -> &RepoDataRecord {
        &self.repodata_record
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{PackageName, Version};
    use std::str::FromStr;

    fn record(name: &str, version: &str, build: &str) -> PrefixRecord {
        let package_record = PackageRecord::new(
            PackageName::from_str(name).unwrap(),
            Version::from_str(version).unwrap(),
            build,
        );
        PrefixRecord::from_repodata_record(
            RepoDataRecord {
                package_record,
                file_name: format!("{name}-{version}-{build}.conda"),
                url: format!("https://conda.anaconda.org/test/linux-64/{name}-{version}-{build}.conda")
                    .parse()
                    .unwrap(),
                channel: Some("test".to_string()),
            },
            PathsJson::default(),
            None,
            None,
        )
    }

    #[test]
    fn test_file_name_and_dist_string() {
        let record = record("python", "3.9.0", "h1_0");
        assert_eq!(record.file_name(), "python-3.9.0-h1_0.json");
        assert_eq!(record.dist_string(), "test::python-3.9.0-h1_0");
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let record = record("numpy", "1.23.0", "py39_0");
        let path = dir.path().join("conda-meta").join(record.file_name());
        record.write_to_path(&path, true).unwrap();

        let loaded = PrefixRecord::from_path(&path).unwrap();
        assert_eq!(
            loaded.repodata_record.package_record.name.as_normalized(),
            "numpy"
        );

        let all = PrefixRecord::collect_from_prefix(dir.path()).unwrap();
        assert_eq!(all.len(), 1);
    }
}
