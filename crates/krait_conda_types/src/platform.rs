//! The platforms (subdirs) a channel can serve packages for.

use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A platform identifier, the leaf directory of a channel URL
/// (`linux-64`, `osx-arm64`, `noarch`, ...).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[allow(missing_docs)]
pub enum Platform {
    NoArch,
    Linux32,
    Linux64,
    LinuxAarch64,
    LinuxPpc64le,
    LinuxS390X,
    Osx64,
    OsxArm64,
    Win32,
    Win64,
    WinArm64,
}

impl Platform {
    /// Returns the platform the current process runs on.
    pub fn current() -> Platform {
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        return Platform::Linux64;
        #[cfg(all(target_os = "linux", target_arch = "x86"))]
        return Platform::Linux32;
        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        return Platform::LinuxAarch64;
        #[cfg(all(target_os = "linux", target_arch = "powerpc64le"))]
        return Platform::LinuxPpc64le;
        #[cfg(all(target_os = "linux", target_arch = "s390x"))]
        return Platform::LinuxS390X;
        #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
        return Platform::Osx64;
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        return Platform::OsxArm64;
        #[cfg(all(target_os = "windows", target_arch = "x86"))]
        return Platform::Win32;
        #[cfg(all(target_os = "windows", target_arch = "x86_64"))]
        return Platform::Win64;
        #[cfg(all(target_os = "windows", target_arch = "aarch64"))]
        return Platform::WinArm64;
    }

    /// Returns a string representation of the platform.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::NoArch => "noarch",
            Platform::Linux32 => "linux-32",
            Platform::Linux64 => "linux-64",
            Platform::LinuxAarch64 => "linux-aarch64",
            Platform::LinuxPpc64le => "linux-ppc64le",
            Platform::LinuxS390X => "linux-s390x",
            Platform::Osx64 => "osx-64",
            Platform::OsxArm64 => "osx-arm64",
            Platform::Win32 => "win-32",
            Platform::Win64 => "win-64",
            Platform::WinArm64 => "win-arm64",
        }
    }

    /// Returns true if the platform is a windows platform.
    pub fn is_windows(self) -> bool {
        matches!(self, Platform::Win32 | Platform::Win64 | Platform::WinArm64)
    }

    /// Returns true if the platform is a linux platform.
    pub fn is_linux(self) -> bool {
        matches!(
            self,
            Platform::Linux32
                | Platform::Linux64
                | Platform::LinuxAarch64
                | Platform::LinuxPpc64le
                | Platform::LinuxS390X
        )
    }

    /// Returns true if the platform is a macOS platform.
    pub fn is_osx(self) -> bool {
        matches!(self, Platform::Osx64 | Platform::OsxArm64)
    }
}

/// An error that occurred while parsing a platform string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("'{string}' is not a known platform")]
pub struct ParsePlatformError {
    /// The string that could not be parsed.
    pub string: String,
}

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "noarch" => Platform::NoArch,
            "linux-32" => Platform::Linux32,
            "linux-64" => Platform::Linux64,
            "linux-aarch64" => Platform::LinuxAarch64,
            "linux-ppc64le" => Platform::LinuxPpc64le,
            "linux-s390x" => Platform::LinuxS390X,
            "osx-64" => Platform::Osx64,
            "osx-arm64" => Platform::OsxArm64,
            "win-32" => Platform::Win32,
            "win-64" => Platform::Win64,
            "win-arm64" => Platform::WinArm64,
            string => {
                return Err(ParsePlatformError {
                    string: string.to_string(),
                })
            }
        })
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}
