//! Package names and their normalization.

use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The name of a package. Package names are compared case-insensitively:
/// equality, ordering and hashing all operate on the lowercased *normalized*
/// form, while the original spelling is retained for display.
#[derive(Debug, Clone, Eq)]
pub struct PackageName {
    /// The original spelling, kept only when it differs from the normalized
    /// form.
    source: Option<Box<str>>,

    /// The lowercased name.
    normalized: Box<str>,
}

impl PackageName {
    /// Constructs a name that is already known to be normalized and valid.
    pub fn new_unchecked(normalized: impl Into<String>) -> Self {
        Self {
            source: None,
            normalized: normalized.into().into_boxed_str(),
        }
    }

    /// Returns the normalized (lowercased) name.
    pub fn as_normalized(&self) -> &str {
        &self.normalized
    }

    /// Returns the name as it was written by the user.
    pub fn as_source(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.normalized)
    }
}

/// An error that occurred while validating a package name.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParsePackageNameError {
    /// The name was empty.
    #[error("empty package name")]
    Empty,

    /// The name contained a character outside `[a-zA-Z0-9._-]`.
    #[error("'{0}' is not allowed in a package name")]
    InvalidCharacter(char),
}

impl FromStr for PackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParsePackageNameError::Empty);
        }
        if let Some(invalid) = s
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '_' | '-'))
        {
            return Err(ParsePackageNameError::InvalidCharacter(invalid));
        }
        let normalized = s.to_ascii_lowercase();
        let source = if normalized == s {
            None
        } else {
            Some(s.into())
        };
        Ok(Self {
            source,
            normalized: normalized.into_boxed_str(),
        })
    }
}

impl TryFrom<&str> for PackageName {
    type Error = ParsePackageNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for PackageName {
    type Error = ParsePackageNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.normalized
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_source())
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_source())
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalization() {
        let name: PackageName = "PyTest-Cov".parse().unwrap();
        assert_eq!(name.as_normalized(), "pytest-cov");
        assert_eq!(name.as_source(), "PyTest-Cov");
        assert_eq!(name, "pytest-cov".parse().unwrap());
    }

    #[test]
    fn test_invalid() {
        assert!("".parse::<PackageName>().is_err());
        assert!("foo bar".parse::<PackageName>().is_err());
        assert!("foo!".parse::<PackageName>().is_err());
    }
}
