//! Types describing the `info/` metadata folder of an extracted package
//! archive.

use std::path::{Path, PathBuf};

use krait_digest::Sha256Hash;
use serde::{Deserialize, Serialize};

use crate::{utils, NoArchType, PackageName, Version};

/// The `info/index.json` file of a package: the package record as it was
/// known at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJson {
    /// The name of the package.
    pub name: PackageName,

    /// The version of the package.
    pub version: Version,

    /// The build string of the package.
    pub build: String,

    /// The build number of the package.
    #[serde(default)]
    pub build_number: u64,

    /// The subdirectory the package was built for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,

    /// Match specs this package depends on.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Match specs that constrain other packages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// The noarch flavor of the package.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// The license of the package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Features tracked by the package.
    #[serde(
        default,
        deserialize_with = "utils::string_or_seq",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub track_features: Vec<String>,
}

impl IndexJson {
    /// Reads the `info/index.json` of an extracted package directory.
    pub fn from_package_directory(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let content = fs_err::read_to_string(path.as_ref().join("info/index.json"))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// The `info/paths.json` file of a package: every file the package installs,
/// along with how to install it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsJson {
    /// The version of the paths.json format.
    #[serde(default = "default_paths_version")]
    pub paths_version: u64,

    /// The entries of the file.
    pub paths: Vec<PathsEntry>,
}

fn default_paths_version() -> u64 {
    1
}

impl PathsJson {
    /// Reads the `info/paths.json` of an extracted package directory.
    pub fn from_package_directory(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let content = fs_err::read_to_string(path.as_ref().join("info/paths.json"))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A single entry in `paths.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsEntry {
    /// The relative path of the file inside the package (and, unless a
    /// noarch-python rewrite applies, inside the prefix).
    #[serde(rename = "_path")]
    pub relative_path: PathBuf,

    /// How the file should be materialized in a prefix.
    #[serde(default)]
    pub path_type: PathType,

    /// Whether the file contains text or binary content, only set when the
    /// file carries a prefix placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<FileMode>,

    /// The placeholder string that must be replaced with the installation
    /// prefix when the file is linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_placeholder: Option<String>,

    /// True if this file should never be hard-linked from the cache.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_link: bool,

    /// The SHA256 hash of the file content.
    #[serde(
        default,
        rename = "sha256",
        skip_serializing_if = "Option::is_none",
        with = "krait_digest::serde::sha256_hex"
    )]
    pub sha256: Option<Sha256Hash>,

    /// The size of the file in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
}

impl PathsEntry {
    /// Returns the placeholder information if this file needs prefix
    /// patching.
    pub fn placeholder(&self) -> Option<PrefixPlaceholder<'_>> {
        self.prefix_placeholder
            .as_deref()
            .map(|placeholder| PrefixPlaceholder {
                file_mode: self.file_mode.unwrap_or(FileMode::Text),
                placeholder,
            })
    }
}

/// The placeholder of a [`PathsEntry`], paired with the file mode that
/// dictates the substitution strategy.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PrefixPlaceholder<'a> {
    /// Whether substitution must preserve the file length (binary) or not
    /// (text).
    pub file_mode: FileMode,

    /// The bytes to replace with the prefix path.
    pub placeholder: &'a str,
}

/// How a file is stored in a package and materialized into a prefix.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    /// A regular file, hard-linkable from the package cache.
    #[default]
    HardLink,

    /// A symbolic link.
    SoftLink,

    /// An (empty) directory.
    Directory,
}

/// The content flavor of a file with a prefix placeholder.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    /// Binary content; placeholder substitution must preserve the length.
    Binary,

    /// Text content; placeholder substitution may change the length.
    Text,
}

/// The `name-version-build` triple encoded in a package archive filename.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ArchiveIdentifier {
    /// The package name.
    pub name: String,

    /// The version string.
    pub version: String,

    /// The build string.
    pub build_string: String,
}

impl ArchiveIdentifier {
    /// Parses an archive filename like `python-3.9.0-h1_0.conda` or
    /// `numpy-1.23.0-py39h1_0.tar.bz2`.
    pub fn try_from_filename(filename: &str) -> Option<Self> {
        let stem = filename
            .strip_suffix(".conda")
            .or_else(|| filename.strip_suffix(".tar.bz2"))?;
        let (rest, build_string) = stem.rsplit_once('-')?;
        let (name, version) = rest.rsplit_once('-')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            version: version.to_string(),
            build_string: build_string.to_string(),
        })
    }
}

impl std::fmt::Display for ArchiveIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.build_string)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_paths_json() {
        let json = r#"{
            "paths_version": 1,
            "paths": [
                {
                    "_path": "bin/foo",
                    "path_type": "hardlink",
                    "file_mode": "text",
                    "prefix_placeholder": "/opt/placeholder",
                    "sha256": "4fe086ac98f2a807bcbbeb1a0dd4e611cc4f1a5954a6a552c69744305acffb45",
                    "size_in_bytes": 12
                },
                {
                    "_path": "lib/libfoo.so",
                    "path_type": "softlink"
                }
            ]
        }"#;
        let paths: PathsJson = serde_json::from_str(json).unwrap();
        assert_eq!(paths.paths.len(), 2);
        let entry = &paths.paths[0];
        assert_eq!(entry.path_type, PathType::HardLink);
        let placeholder = entry.placeholder().unwrap();
        assert_eq!(placeholder.file_mode, FileMode::Text);
        assert_eq!(placeholder.placeholder, "/opt/placeholder");
        assert_eq!(paths.paths[1].path_type, PathType::SoftLink);
        assert!(paths.paths[1].placeholder().is_none());
    }

    #[test]
    fn test_archive_identifier() {
        let id = ArchiveIdentifier::try_from_filename("python-3.9.0-h1_0.conda").unwrap();
        assert_eq!(id.name, "python");
        assert_eq!(id.version, "3.9.0");
        assert_eq!(id.build_string, "h1_0");

        let id =
            ArchiveIdentifier::try_from_filename("numpy-1.23.0-py39h1_0.tar.bz2").unwrap();
        assert_eq!(id.name, "numpy");

        assert!(ArchiveIdentifier::try_from_filename("nonsense.zip").is_none());
    }
}
