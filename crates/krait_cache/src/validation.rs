//! Validation of extracted package directories.

use std::path::{Path, PathBuf};

use krait_conda_types::package::{IndexJson, PathType, PathsEntry, PathsJson};
use krait_digest::{compute_file_digest, Sha256};
use thiserror::Error;

/// The reasons a package directory can fail validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The `info/index.json` is missing or unreadable.
    #[error("unable to read 'info/index.json'")]
    MissingIndexJson(#[source] std::io::Error),

    /// The `info/paths.json` is missing or unreadable.
    #[error("unable to read 'info/paths.json'")]
    MissingPathsJson(#[source] std::io::Error),

    /// A file listed in `paths.json` does not match the directory contents.
    #[error("the path '{}' {reason}", .path.display())]
    CorruptEntry {
        /// The offending relative path.
        path: PathBuf,
        /// What exactly is wrong with it.
        reason: String,
    },

    /// An unexpected I/O failure while inspecting the directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Verifies that the package directory matches its own metadata: the `info/`
/// folder parses and every entry of `paths.json` exists with the recorded
/// size and SHA256.
pub fn validate_package_directory(path: &Path) -> Result<IndexJson, ValidationError> {
    let index = IndexJson::from_package_directory(path)
        .map_err(ValidationError::MissingIndexJson)?;
    let paths =
        PathsJson::from_package_directory(path).map_err(ValidationError::MissingPathsJson)?;

    for entry in &paths.paths {
        validate_package_entry(path, entry)?;
    }
    Ok(index)
}

fn validate_package_entry(package_dir: &Path, entry: &PathsEntry) -> Result<(), ValidationError> {
    let corrupt = |reason: String| ValidationError::CorruptEntry {
        path: entry.relative_path.clone(),
        reason,
    };
    let path = package_dir.join(&entry.relative_path);

    match entry.path_type {
        PathType::Directory => {
            return if path.is_dir() {
                Ok(())
            } else {
                Err(corrupt("is not a directory".to_string()))
            };
        }
        PathType::SoftLink => {
            return if path.symlink_metadata().is_ok() {
                Ok(())
            } else {
                Err(corrupt("is a missing symlink".to_string()))
            };
        }
        PathType::HardLink => {}
    }

    let metadata = path
        .symlink_metadata()
        .map_err(|_| corrupt("is missing".to_string()))?;

    if let Some(expected_size) = entry.size_in_bytes {
        if metadata.len() != expected_size {
            return Err(corrupt(format!(
                "has size {} but {expected_size} was recorded",
                metadata.len()
            )));
        }
    }

    if let Some(expected_sha256) = &entry.sha256 {
        let actual = compute_file_digest::<Sha256>(&path)?;
        if &actual != expected_sha256 {
            return Err(corrupt("does not match its recorded sha256".to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use krait_digest::compute_bytes_digest;
    use std::fs;

    /// Writes a minimal valid package directory and returns its path.
    pub(crate) fn write_package(root: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let package_dir = root.join(name);
        fs::create_dir_all(package_dir.join("info")).unwrap();

        let mut entries = Vec::new();
        for (relative, content) in files {
            let full = package_dir.join(relative);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, content).unwrap();
            entries.push(serde_json::json!({
                "_path": relative,
                "path_type": "hardlink",
                "sha256": format!("{:x}", compute_bytes_digest::<Sha256>(content)),
                "size_in_bytes": content.len(),
            }));
        }

        fs::write(
            package_dir.join("info/index.json"),
            serde_json::json!({
                "name": "pkg",
                "version": "1.0",
                "build": "0",
                "build_number": 0,
                "depends": [],
                "subdir": "linux-64"
            })
            .to_string(),
        )
        .unwrap();
        fs::write(
            package_dir.join("info/paths.json"),
            serde_json::json!({ "paths_version": 1, "paths": entries }).to_string(),
        )
        .unwrap();

        package_dir
    }

    #[test]
    fn test_valid_directory_passes() {
        let dir = tempfile::tempdir().unwrap();
        let package_dir = write_package(dir.path(), "pkg-1.0-0", &[("bin/tool", b"#!/bin/sh\n")]);
        let index = validate_package_directory(&package_dir).unwrap();
        assert_eq!(index.name.as_normalized(), "pkg");
    }

    #[test]
    fn test_size_mismatch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let package_dir = write_package(dir.path(), "pkg-1.0-0", &[("bin/tool", b"content")]);
        fs::write(package_dir.join("bin/tool"), b"content changed").unwrap();
        assert!(matches!(
            validate_package_directory(&package_dir),
            Err(ValidationError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_content_mutation_of_same_size_fails() {
        let dir = tempfile::tempdir().unwrap();
        let package_dir = write_package(dir.path(), "pkg-1.0-0", &[("bin/tool", b"content")]);
        fs::write(package_dir.join("bin/tool"), b"tnetnoc").unwrap();
        assert!(matches!(
            validate_package_directory(&package_dir),
            Err(ValidationError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_missing_info_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_package_directory(dir.path()),
            Err(ValidationError::MissingIndexJson(_))
        ));
    }
}
