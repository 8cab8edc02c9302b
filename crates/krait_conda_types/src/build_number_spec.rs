//! A constraint over the build number of a package.

use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A predicate over a build number, e.g. `>=2` in `foo[build_number=">=2"]`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct BuildNumberSpec {
    /// The comparison operator. A bare number means equality.
    pub op: BuildNumberOperator,

    /// The build number to compare against.
    pub build_number: u64,
}

/// The operator of a [`BuildNumberSpec`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum BuildNumberOperator {
    Equals,
    NotEquals,
    Greater,
    GreaterEquals,
    Less,
    LessEquals,
}

impl BuildNumberSpec {
    /// Returns true if `build_number` satisfies this predicate.
    pub fn matches(&self, build_number: u64) -> bool {
        match self.op {
            BuildNumberOperator::Equals => build_number == self.build_number,
            BuildNumberOperator::NotEquals => build_number != self.build_number,
            BuildNumberOperator::Greater => build_number > self.build_number,
            BuildNumberOperator::GreaterEquals => build_number >= self.build_number,
            BuildNumberOperator::Less => build_number < self.build_number,
            BuildNumberOperator::LessEquals => build_number <= self.build_number,
        }
    }
}

/// An error that occurred while parsing a build number spec.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseBuildNumberSpecError {
    /// The operator was not recognized.
    #[error("invalid build number operator '{0}'")]
    InvalidOperator(String),

    /// The number part was not an integer.
    #[error("invalid build number '{0}'")]
    InvalidNumber(String),
}

impl FromStr for BuildNumberSpec {
    type Err = ParseBuildNumberSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let op_len = s
            .find(|c: char| !matches!(c, '=' | '<' | '>' | '!'))
            .unwrap_or(s.len());
        let (op_str, number_str) = s.split_at(op_len);
        let op = match op_str {
            "" | "=" | "==" => BuildNumberOperator::Equals,
            "!=" => BuildNumberOperator::NotEquals,
            ">" => BuildNumberOperator::Greater,
            ">=" => BuildNumberOperator::GreaterEquals,
            "<" => BuildNumberOperator::Less,
            "<=" => BuildNumberOperator::LessEquals,
            other => return Err(ParseBuildNumberSpecError::InvalidOperator(other.to_string())),
        };
        let build_number = number_str
            .trim()
            .parse()
            .map_err(|_| ParseBuildNumberSpecError::InvalidNumber(number_str.to_string()))?;
        Ok(Self { op, build_number })
    }
}

impl Display for BuildNumberSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            BuildNumberOperator::Equals => "==",
            BuildNumberOperator::NotEquals => "!=",
            BuildNumberOperator::Greater => ">",
            BuildNumberOperator::GreaterEquals => ">=",
            BuildNumberOperator::Less => "<",
            BuildNumberOperator::LessEquals => "<=",
        };
        write!(f, "{op}{}", self.build_number)
    }
}

impl Serialize for BuildNumberSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BuildNumberSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}
