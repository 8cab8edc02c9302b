//! Matching of free-form strings (such as build strings) against exact values
//! or glob patterns.

use std::{
    fmt,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Matches a string either exactly or against a glob pattern. Used for the
/// build-string part of a match spec (`py39*`, `*_cpython`).
#[derive(Debug, Clone)]
pub struct StringMatcher {
    source: String,
    kind: StringMatcherKind,
}

#[derive(Debug, Clone)]
enum StringMatcherKind {
    Exact,
    Glob(glob::Pattern),
}

impl StringMatcher {
    /// Returns true if `value` matches.
    pub fn matches(&self, value: &str) -> bool {
        match &self.kind {
            StringMatcherKind::Exact => self.source == value,
            StringMatcherKind::Glob(pattern) => pattern.matches(value),
        }
    }

    /// The original pattern string.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// An error that occurred while parsing a string matcher.
#[derive(Debug, Error)]
pub enum ParseStringMatcherError {
    /// The glob pattern was malformed.
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(#[from] glob::PatternError),
}

impl FromStr for StringMatcher {
    type Err = ParseStringMatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = if s.contains('*') || s.contains('?') {
            StringMatcherKind::Glob(glob::Pattern::new(s)?)
        } else {
            StringMatcherKind::Exact
        };
        Ok(Self {
            source: s.to_string(),
            kind,
        })
    }
}

impl Display for StringMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for StringMatcher {}

impl Hash for StringMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl Serialize for StringMatcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for StringMatcher {
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
    fn test_exact() {
        let matcher: StringMatcher = "py39h1".parse().unwrap();
        assert!(matcher.matches("py39h1"));
        assert!(!matcher.matches("py39h2"));
    }

    #[test]
    fn test_glob() {
        let matcher: StringMatcher = "py39*".parse().unwrap();
        assert!(matcher.matches("py39h1"));
        assert!(matcher.matches("py39"));
        assert!(!matcher.matches("py38h1"));
    }
}
