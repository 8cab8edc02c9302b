//! Version constraint expressions such as `>=1.8,<2` or `1.2.*`.

use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::{ParseVersionError, Version};

/// An operator in a single version predicate.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum VersionOperator {
    Equals,
    NotEquals,
    Greater,
    GreaterEquals,
    Less,
    LessEquals,
    /// The `=1.2` / `1.2.*` relation: the version must start with the operand.
    StartsWith,
    /// The negation of [`VersionOperator::StartsWith`] (`!=1.2.*`).
    NotStartsWith,
    /// The compatible-release relation `~=`.
    Compatible,
}

impl VersionOperator {
    fn matches(self, version: &Version, operand: &Version) -> bool {
        match self {
            VersionOperator::Equals => version == operand,
            VersionOperator::NotEquals => version != operand,
            VersionOperator::Greater => version > operand,
            VersionOperator::GreaterEquals => version >= operand,
            VersionOperator::Less => version < operand,
            VersionOperator::LessEquals => version <= operand,
            VersionOperator::StartsWith => version.starts_with(operand),
            VersionOperator::NotStartsWith => !version.starts_with(operand),
            VersionOperator::Compatible => version.compatible_with(operand),
        }
    }
}

/// The connective of a [`VersionSpec::Group`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LogicalOperator {
    /// All sub-expressions must match (`,`).
    And,
    /// At least one sub-expression must match (`|`).
    Or,
}

/// A boolean expression over version predicates. `>=1.8,<2|==3.0` parses into
/// `Or(And(>=1.8, <2), ==3.0)`: `|` binds weaker than `,`, yielding a DNF
/// tree.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum VersionSpec {
    /// Matches every version (`*`).
    Any,
    /// A single predicate.
    Operator(VersionOperator, Version),
    /// A conjunction or disjunction of sub-expressions.
    Group(LogicalOperator, Vec<VersionSpec>),
}

impl VersionSpec {
    /// Returns true if `version` satisfies this expression.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Operator(op, operand) => op.matches(version, operand),
            VersionSpec::Group(LogicalOperator::And, parts) => {
                parts.iter().all(|part| part.matches(version))
            }
            VersionSpec::Group(LogicalOperator::Or, parts) => {
                parts.iter().any(|part| part.matches(version))
            }
        }
    }
}

/// An error that occurred while parsing a version spec.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionSpecError {
    /// The version part of a predicate did not parse.
    #[error(transparent)]
    InvalidVersion(#[from] ParseVersionError),

    /// A predicate was empty (e.g. a trailing comma).
    #[error("empty version constraint")]
    EmptyConstraint,

    /// An operator that does not exist.
    #[error("invalid version operator '{0}'")]
    InvalidOperator(String),
}

impl FromStr for VersionSpec {
    type Err = ParseVersionSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut or_parts = Vec::new();
        for or_part in s.split('|') {
            let mut and_parts = Vec::new();
            for and_part in or_part.split(',') {
                and_parts.push(parse_constraint(and_part.trim())?);
            }
            or_parts.push(match and_parts.len() {
                1 => and_parts.pop().expect("not empty"),
                _ => VersionSpec::Group(LogicalOperator::And, and_parts),
            });
        }
        Ok(match or_parts.len() {
            1 => or_parts.pop().expect("not empty"),
            _ => VersionSpec::Group(LogicalOperator::Or, or_parts),
        })
    }
}

/// Parses a single predicate: an optional operator followed by a version
/// literal, possibly with a trailing `.*` or `*` glob.
fn parse_constraint(constraint: &str) -> Result<VersionSpec, ParseVersionSpecError> {
    if constraint.is_empty() {
        return Err(ParseVersionSpecError::EmptyConstraint);
    }
    if constraint == "*" {
        return Ok(VersionSpec::Any);
    }

    let (op, rest) = split_operator(constraint)?;
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(ParseVersionSpecError::EmptyConstraint);
    }

    // A trailing glob turns (in)equality into a starts-with relation.
    let (rest, globbed) = if let Some(stripped) = rest.strip_suffix(".*") {
        (stripped, true)
    } else if let Some(stripped) = rest.strip_suffix('*') {
        (stripped, true)
    } else {
        (rest, false)
    };

    let version = Version::from_str(rest)?;
    let op = match (op, globbed) {
        (None, false) => VersionOperator::Equals,
        (None, true) => VersionOperator::StartsWith,
        (Some(op), false) => op,
        (Some(VersionOperator::Equals | VersionOperator::StartsWith), true) => {
            VersionOperator::StartsWith
        }
        (Some(VersionOperator::NotEquals), true) => VersionOperator::NotStartsWith,
        (Some(op), true) => {
            // `>=1.8.*` and friends: the glob carries no meaning, conda
            // ignores it as well.
            op
        }
    };

    // `=1.2` is the fuzzy form of `1.2.*`.
    let op = if op == VersionOperator::Equals && !globbed && is_fuzzy_equals(constraint) {
        VersionOperator::StartsWith
    } else {
        op
    };

    Ok(VersionSpec::Operator(op, version))
}

/// Returns true for constraints written with a single `=`, which conda treats
/// as a prefix match rather than exact equality.
fn is_fuzzy_equals(constraint: &str) -> bool {
    constraint.starts_with('=') && !constraint.starts_with("==")
}

fn split_operator(
    constraint: &str,
) -> Result<(Option<VersionOperator>, &str), ParseVersionSpecError> {
    let op_len = constraint
        .find(|c: char| !matches!(c, '=' | '<' | '>' | '!' | '~'))
        .unwrap_or(constraint.len());
    let (op_str, rest) = constraint.split_at(op_len);
    let op = match op_str {
        "" => None,
        "==" | "=" => Some(VersionOperator::Equals),
        "!=" => Some(VersionOperator::NotEquals),
        ">" => Some(VersionOperator::Greater),
        ">=" => Some(VersionOperator::GreaterEquals),
        "<" => Some(VersionOperator::Less),
        "<=" => Some(VersionOperator::LessEquals),
        "~=" => Some(VersionOperator::Compatible),
        other => return Err(ParseVersionSpecError::InvalidOperator(other.to_string())),
    };
    Ok((op, rest))
}

impl Display for VersionOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VersionOperator::Equals => write!(f, "=="),
            VersionOperator::NotEquals => write!(f, "!="),
            VersionOperator::Greater => write!(f, ">"),
            VersionOperator::GreaterEquals => write!(f, ">="),
            VersionOperator::Less => write!(f, "<"),
            VersionOperator::LessEquals => write!(f, "<="),
            VersionOperator::Compatible => write!(f, "~="),
            // StartsWith renders through the version glob instead.
            VersionOperator::StartsWith | VersionOperator::NotStartsWith => Ok(()),
        }
    }
}

impl Display for VersionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Any => write!(f, "*"),
            VersionSpec::Operator(VersionOperator::StartsWith, version) => {
                write!(f, "{version}.*")
            }
            VersionSpec::Operator(VersionOperator::NotStartsWith, version) => {
                write!(f, "!={version}.*")
            }
            VersionSpec::Operator(op, version) => write!(f, "{op}{version}"),
            VersionSpec::Group(op, parts) => {
                let separator = match op {
                    LogicalOperator::And => ",",
                    LogicalOperator::Or => "|",
                };
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "{separator}")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec(s: &str) -> VersionSpec {
        s.parse().unwrap()
    }

    fn version(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_simple_operators() {
        assert!(spec(">=1.8").matches(&version("1.8")));
        assert!(spec(">=1.8").matches(&version("2.0")));
        assert!(!spec(">=1.8").matches(&version("1.7.2")));
        assert!(spec("<2").matches(&version("1.9.9")));
        assert!(!spec("<2").matches(&version("2.0")));
        assert!(spec("!=1.5").matches(&version("1.5.1")));
        assert!(!spec("!=1.5").matches(&version("1.5.0")));
        assert!(spec("==1.5").matches(&version("1.5.0")));
    }

    #[test]
    fn test_and_group() {
        let spec = spec(">=3.9,<3.10");
        assert!(spec.matches(&version("3.9.0")));
        assert!(spec.matches(&version("3.9.12")));
        assert!(!spec.matches(&version("3.10.0")));
        assert!(!spec.matches(&version("3.8.9")));
    }

    #[test]
    fn test_or_binds_weaker_than_and() {
        let spec = spec(">=1.8,<2|==3.0");
        assert!(spec.matches(&version("1.9")));
        assert!(spec.matches(&version("3.0")));
        assert!(!spec.matches(&version("2.5")));
    }

    #[test]
    fn test_starts_with_forms() {
        for form in ["1.2.*", "=1.2", "1.2*", "==1.2.*"] {
            let spec = spec(form);
            assert!(spec.matches(&version("1.2.3")), "{form}");
            assert!(spec.matches(&version("1.2")), "{form}");
            assert!(!spec.matches(&version("1.20")), "{form}");
        }
        assert!(!spec("1.2").matches(&version("1.2.3")));
        assert!(spec("!=1.2.*").matches(&version("1.3.0")));
        assert!(!spec("!=1.2.*").matches(&version("1.2.3")));
    }

    #[test]
    fn test_compatible_release() {
        let spec = spec("~=3.9.1");
        assert!(spec.matches(&version("3.9.1")));
        assert!(spec.matches(&version("3.9.7")));
        assert!(!spec.matches(&version("3.10.0")));
        assert!(!spec.matches(&version("3.9.0")));
    }

    #[test]
    fn test_any() {
        assert!(spec("*").matches(&version("0.0.0dev0")));
    }

    #[test]
    fn test_round_trip() {
        for s in ["*", ">=1.8,<2", ">=1.8,<2|==3.0", "1.2.*", "~=3.9.1", "!=1.2.*"] {
            assert_eq!(spec(s).to_string(), s);
        }
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            ">=1.8,".parse::<VersionSpec>(),
            Err(ParseVersionSpecError::EmptyConstraint)
        ));
        assert!(matches!(
            ">==1.8".parse::<VersionSpec>(),
            Err(ParseVersionSpecError::InvalidOperator(_))
        ));
        assert!(matches!(
            ">=1..8".parse::<VersionSpec>(),
            Err(ParseVersionSpecError::InvalidVersion(_))
        ));
    }
}
