//! Path information for the python interpreter of a prefix, required when
//! noarch-python packages are linked.

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use krait_conda_types::{PackageRecord, Platform};
use thiserror::Error;

/// Everything the link step needs to know about the python installation of
/// the target prefix.
#[derive(Debug, Clone)]
pub struct PythonInfo {
    /// The platform the prefix is built for.
    pub platform: Platform,

    /// The major and minor version of the interpreter.
    pub short_version: (u64, u64),

    /// The prefix-relative path of the interpreter binary.
    pub path: PathBuf,

    /// The prefix-relative directory that holds site-packages.
    pub site_packages_path: PathBuf,

    /// The prefix-relative directory that holds entry-point scripts.
    pub bin_dir: PathBuf,
}

/// Errors raised while deriving [`PythonInfo`].
#[derive(Debug, Clone, Error)]
pub enum PythonInfoError {
    /// The version of the python record has no major/minor part.
    #[error("invalid python version '{0}'")]
    InvalidVersion(String),
}

impl PythonInfo {
    /// Derives the info from the record of the python package chosen for the
    /// target state.
    pub fn from_record(record: &PackageRecord, platform: Platform) -> Result<Self, PythonInfoError> {
        let (major, minor) = record
            .version
            .as_major_minor()
            .ok_or_else(|| PythonInfoError::InvalidVersion(record.version.to_string()))?;

        let path = if platform.is_windows() {
            PathBuf::from("python.exe")
        } else {
            PathBuf::from(format!("bin/python{major}.{minor}"))
        };

        let site_packages_path = match record.python_site_packages_path.as_deref() {
            Some(path) => PathBuf::from(path),
            None if platform.is_windows() => PathBuf::from("Lib/site-packages"),
            None => PathBuf::from(format!("lib/python{major}.{minor}/site-packages")),
        };

        let bin_dir = if platform.is_windows() {
            PathBuf::from("Scripts")
        } else {
            PathBuf::from("bin")
        };

        Ok(Self {
            platform,
            short_version: (major, minor),
            path,
            site_packages_path,
            bin_dir,
        })
    }

    /// The prefix-relative path of the interpreter.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maps a path inside a noarch-python package archive to its location in
    /// the prefix.
    pub fn noarch_target_path<'a>(&self, relative_path: &'a Path) -> Cow<'a, Path> {
        if let Ok(rest) = relative_path.strip_prefix("site-packages/") {
            self.site_packages_path.join(rest).into()
        } else if let Ok(rest) = relative_path.strip_prefix("python-scripts/") {
            self.bin_dir.join(rest).into()
        } else {
            relative_path.into()
        }
    }

    /// True if moving from `previous` to `self` requires relinking all
    /// noarch-python packages (their target paths change).
    pub fn is_relink_required(&self, previous: &PythonInfo) -> bool {
        self.short_version != previous.short_version
    }

    /// A shebang line that runs scripts with this interpreter. Falls back to
    /// the `/bin/sh` trampoline when the path is too long for a shebang or
    /// contains spaces.
    pub fn shebang(&self, target_prefix: &str) -> String {
        let target_path = Path::new(target_prefix).join(&self.path);
        let target_path = target_path.to_string_lossy().replace('\\', "/");

        // Shebang lines longer than 127 bytes are truncated by the kernel.
        if target_path.len() > 127 - 2 || target_path.contains(' ') {
            format!("#!/bin/sh\n'''exec' \"{target_path}\" \"$0\" \"$@\" #'''")
        } else {
            format!("#!{target_path}")
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use krait_conda_types::PackageName;

    fn python_record(version: &str) -> PackageRecord {
        PackageRecord::new(
            PackageName::new_unchecked("python"),
            version.parse().unwrap(),
            "h1_0",
        )
    }

    #[test]
    fn test_linux_paths() {
        let info = PythonInfo::from_record(&python_record("3.9.2"), Platform::Linux64).unwrap();
        assert_eq!(info.short_version, (3, 9));
        assert_eq!(info.path, Path::new("bin/python3.9"));
        assert_eq!(
            info.site_packages_path,
            Path::new("lib/python3.9/site-packages")
        );
    }

    #[test]
    fn test_noarch_rewrites() {
        let info = PythonInfo::from_record(&python_record("3.10.1"), Platform::Linux64).unwrap();
        assert_eq!(
            info.noarch_target_path(Path::new("site-packages/foo/__init__.py")),
            Path::new("lib/python3.10/site-packages/foo/__init__.py")
        );
        assert_eq!(
            info.noarch_target_path(Path::new("python-scripts/tool")),
            Path::new("bin/tool")
        );
        assert_eq!(
            info.noarch_target_path(Path::new("share/doc/readme")),
            Path::new("share/doc/readme")
        );
    }

    #[test]
    fn test_relink_is_needed_across_minor_versions() {
        let old = PythonInfo::from_record(&python_record("3.9.2"), Platform::Linux64).unwrap();
        let new = PythonInfo::from_record(&python_record("3.10.0"), Platform::Linux64).unwrap();
        let same = PythonInfo::from_record(&python_record("3.9.7"), Platform::Linux64).unwrap();
        assert!(new.is_relink_required(&old));
        assert!(!same.is_relink_required(&old));
    }

    #[test]
    fn test_shebang() {
        let info = PythonInfo::from_record(&python_record("3.9.2"), Platform::Linux64).unwrap();
        assert_eq!(info.shebang("/opt/env"), "#!/opt/env/bin/python3.9");
        let long_prefix = format!("/opt/{}", "x".repeat(150));
        assert!(info.shebang(&long_prefix).starts_with("#!/bin/sh\n"));
    }
}
