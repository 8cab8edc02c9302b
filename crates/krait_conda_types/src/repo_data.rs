//! Types describing the contents of a channel subdirectory (`repodata.json`).

use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use krait_digest::{Md5Hash, Sha256Hash};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{utils, NoArchType, PackageName, Version};

/// The parsed content of a `repodata.json` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoData {
    /// The version of the repodata format.
    #[serde(default, rename = "repodata_version")]
    pub version: Option<u64>,

    /// Information about the subdirectory the repodata describes.
    #[serde(default)]
    pub info: Option<ChannelInfo>,

    /// The `.tar.bz2` packages in the subdirectory, keyed by filename.
    #[serde(default)]
    pub packages: IndexMap<String, PackageRecord>,

    /// The `.conda` packages in the subdirectory, keyed by filename.
    #[serde(default, rename = "packages.conda")]
    pub conda_packages: IndexMap<String, PackageRecord>,

    /// Filenames that have been removed from the subdirectory and should be
    /// ignored even when still listed under `packages`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

/// The `info` block of a `repodata.json` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// The subdirectory (platform) the repodata describes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,

    /// The base url of all packages, if it differs from the channel url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A single package as described in repodata. This is the record the solver
/// reasons about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// The lowercased name of the package.
    pub name: PackageName,

    /// The version of the package.
    pub version: Version,

    /// The build string of the package, e.g. `py39h1a2b3_0`.
    pub build: String,

    /// The build number of the package.
    #[serde(default)]
    pub build_number: u64,

    /// The subdirectory (platform) the package was built for.
    #[serde(default)]
    pub subdir: String,

    /// Match specs this package depends on.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Match specs that constrain other packages without pulling them in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// Features tracked by this package; any tracked feature penalizes the
    /// package during candidate selection.
    #[serde(
        default,
        deserialize_with = "utils::string_or_seq",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub track_features: Vec<String>,

    /// The noarch flavor of the package.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// The license of the package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// The MD5 hash of the package archive.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "krait_digest::serde::md5_hex"
    )]
    pub md5: Option<Md5Hash>,

    /// The SHA256 hash of the package archive.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "krait_digest::serde::sha256_hex"
    )]
    pub sha256: Option<Sha256Hash>,

    /// The size of the package archive in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// When the package was built.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "utils::timestamp"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    /// Signatures over the package, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<serde_json::Value>,

    /// The relative path below the prefix where a python interpreter keeps
    /// its site-packages, if this record describes one and it deviates from
    /// the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_site_packages_path: Option<String>,
}

impl PackageRecord {
    /// Creates a minimal record; everything not passed is defaulted. Mostly
    /// useful in tests and for synthesized records.
    pub fn new(name: PackageName, version: Version, build: impl Into<String>) -> Self {
        Self {
            name,
            version,
            build: build.into(),
            build_number: 0,
            subdir: String::new(),
            depends: Vec::new(),
            constrains: Vec::new(),
            track_features: Vec::new(),
            noarch: NoArchType::none(),
            license: None,
            md5: None,
            sha256: None,
            size: None,
            timestamp: None,
            signatures: None,
            python_site_packages_path: None,
        }
    }
}

impl AsRef<PackageRecord> for PackageRecord {
    fn as_ref(&self) -> &PackageRecord {
        self
    }
}

impl std::fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.build.is_empty() {
            write!(f, "{}={}", self.name.as_normalized(), self.version)
        } else {
            write!(
                f,
                "{}={}={}",
                self.name.as_normalized(),
                self.version,
                self.build
            )
        }
    }
}

/// A [`PackageRecord`] joined with its provenance: the filename it was keyed
/// under, the URL it can be downloaded from and the channel it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoDataRecord {
    /// The repodata record.
    #[serde(flatten)]
    pub package_record: PackageRecord,

    /// The filename of the package archive.
    #[serde(rename = "fn")]
    pub file_name: String,

    /// The canonical download URL of the package archive.
    pub url: Url,

    /// The channel the record came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl AsRef<PackageRecord> for RepoDataRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.package_record
    }
}

impl RepoData {
    /// Reads and parses a `repodata.json` from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let content = fs_err::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Converts the repodata into a flat list of [`RepoDataRecord`]s,
    /// resolving URLs against the given channel base url and skipping
    /// everything listed under `removed`.
    pub fn into_records(self, channel_name: &str, base_url: &Url) -> Vec<RepoDataRecord> {
        let removed: std::collections::HashSet<String> = self.removed.into_iter().collect();
        let subdir = self
            .info
            .as_ref()
            .and_then(|info| info.subdir.clone())
            .unwrap_or_default();

        self.packages
            .into_iter()
            .chain(self.conda_packages)
            .filter(|(file_name, _)| !removed.contains(file_name))
            .filter_map(|(file_name, mut package_record)| {
                if package_record.subdir.is_empty() {
                    package_record.subdir = subdir.clone();
                }
                let url = append_file_name(base_url, &file_name)?;
                Some(RepoDataRecord {
                    package_record,
                    file_name,
                    url,
                    channel: Some(channel_name.to_string()),
                })
            })
            .collect()
    }
}

fn append_file_name(base_url: &Url, file_name: &str) -> Option<Url> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .push(file_name);
    Some(url)
}
