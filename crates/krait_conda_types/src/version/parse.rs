use std::{
    error::Error,
    fmt::{Display, Formatter},
};

use smallvec::SmallVec;
use thiserror::Error;

use super::{Component, Literal, Segment, Version};

/// An error that occurred while parsing a version string.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParseVersionError {
    /// The string that was the input of the parser.
    pub version: String,

    /// The kind of parse error that occurred.
    pub kind: ParseVersionErrorKind,
}

impl Display for ParseVersionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "malformed version string '{}': {}",
            &self.version, &self.kind
        )
    }
}

impl Error for ParseVersionError {}

impl ParseVersionError {
    pub(crate) fn new(text: impl Into<String>, kind: ParseVersionErrorKind) -> Self {
        Self {
            version: text.into(),
            kind,
        }
    }
}

/// The kind of error that occurred while parsing a version string.
#[derive(Debug, Eq, PartialEq, Clone, Error)]
pub enum ParseVersionErrorKind {
    /// The string was empty.
    #[error("empty string")]
    Empty,
    /// The string contained a character that is not allowed in a version.
    #[error("invalid character '{0}'")]
    InvalidCharacter(char),
    /// The epoch (the part before `!`) was not an integer.
    #[error("epoch is not a number")]
    EpochMustBeInteger,
    /// More than one `!` was found.
    #[error("duplicated epoch separator '!'")]
    DuplicateEpochSeparator,
    /// More than one `+` was found.
    #[error("duplicated local version separator '+'")]
    DuplicateLocalSeparator,
    /// An empty version component (e.g. two consecutive dots) was found.
    #[error("expected a version component e.g. `2` or `rc`")]
    EmptyVersionComponent,
    /// A numeral did not fit in 64 bits.
    #[error("number is too large")]
    InvalidNumeral,
}

/// Parses a version string. See the module documentation of
/// [`super`] for the accepted format.
pub(crate) fn parse_version(input: &str) -> Result<Version, ParseVersionError> {
    let error = |kind| ParseVersionError::new(input, kind);

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(error(ParseVersionErrorKind::Empty));
    }
    if let Some(invalid) = trimmed.chars().find(|c| !c.is_ascii()) {
        return Err(error(ParseVersionErrorKind::InvalidCharacter(invalid)));
    }

    let mut norm = trimmed.to_ascii_lowercase();

    // Dashes are normalized to underscores, but only when the version does
    // not already contain underscores (the conda convention for openssl-style
    // versions).
    if norm.contains('-') {
        if norm.contains('_') {
            return Err(error(ParseVersionErrorKind::InvalidCharacter('-')));
        }
        norm = norm.replace('-', "_");
    }

    // Split off the epoch.
    let (epoch, rest) = match norm.split_once('!') {
        Some((epoch_str, rest)) => {
            if rest.contains('!') {
                return Err(error(ParseVersionErrorKind::DuplicateEpochSeparator));
            }
            let epoch = epoch_str
                .parse::<u64>()
                .map_err(|_| error(ParseVersionErrorKind::EpochMustBeInteger))?;
            (Some(epoch), rest)
        }
        None => (None, norm.as_str()),
    };

    // Split off the local part.
    let (version_part, local_part) = match rest.split_once('+') {
        Some((version_part, local_part)) => {
            if local_part.contains('+') {
                return Err(error(ParseVersionErrorKind::DuplicateLocalSeparator));
            }
            (version_part, Some(local_part))
        }
        None => (rest, None),
    };

    let segments = parse_segments(version_part).map_err(error)?;
    let local = match local_part {
        Some(local_part) => parse_segments(local_part).map_err(error)?,
        None => Vec::new(),
    };

    Ok(Version::from_parts(
        norm.into_boxed_str(),
        epoch,
        segments,
        local,
    ))
}

/// Splits a version (or local version) part into segments at `.` and scans
/// every segment into components.
fn parse_segments(part: &str) -> Result<Vec<Segment>, ParseVersionErrorKind> {
    part.split('.').map(parse_segment).collect()
}

fn parse_segment(segment: &str) -> Result<Segment, ParseVersionErrorKind> {
    if segment.is_empty() {
        return Err(ParseVersionErrorKind::EmptyVersionComponent);
    }

    let bytes = segment.as_bytes();
    let mut components = SmallVec::<[Component; 2]>::new();
    let mut idx = 0;
    while idx < bytes.len() {
        let numeral = if bytes[idx].is_ascii_digit() {
            let start = idx;
            while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                idx += 1;
            }
            segment[start..idx]
                .parse::<u64>()
                .map_err(|_| ParseVersionErrorKind::InvalidNumeral)?
        } else {
            // A segment that starts with a literal gets an implicit leading
            // zero so numerals and literals stay in phase: `1.1.a1 == 1.1.0a1`.
            0
        };

        let start = idx;
        while idx < bytes.len() && !bytes[idx].is_ascii_digit() {
            let c = bytes[idx] as char;
            if !c.is_ascii_alphabetic() && c != '_' && c != '*' {
                return Err(ParseVersionErrorKind::InvalidCharacter(c));
            }
            idx += 1;
        }
        let literal = literal_from_run(&segment[start..idx]);

        components.push(Component { numeral, literal });
    }

    Ok(Segment(components))
}

fn literal_from_run(run: &str) -> Literal {
    match run {
        "" => Literal::Empty,
        "*" => Literal::Star,
        "dev" => Literal::Dev,
        "post" => Literal::Post,
        "_" => Literal::Underscore,
        other => Literal::Other(other.into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    fn kinds(input: &str) -> ParseVersionErrorKind {
        parse_version(input).unwrap_err().kind
    }

    #[test]
    fn test_parse_simple() {
        let version = parse_version("1.2.3").unwrap();
        assert_eq!(version.epoch(), 0);
        assert_eq!(version.segments().len(), 3);
        assert!(!version.has_local());
    }

    #[test]
    fn test_parse_epoch_and_local() {
        let version = parse_version("2!1.0+4.2").unwrap();
        assert_eq!(version.epoch(), 2);
        assert!(version.has_epoch());
        assert!(version.has_local());
    }

    #[test]
    fn test_parse_mixed_segments() {
        // `1.2g.beta15.rc` => [[1], [2, g], [0, beta, 15], [0, rc]]
        let version = parse_version("1.2g.beta15.rc").unwrap();
        let segments = version.segments();
        assert_eq!(segments[0].components().len(), 1);
        assert_eq!(segments[1].components().len(), 1);
        assert_eq!(segments[1].components()[0].numeral, 2);
        assert_eq!(segments[2].components().len(), 2);
        assert_eq!(segments[2].components()[0].numeral, 0);
        assert_eq!(segments[2].components()[1].numeral, 15);
    }

    #[test]
    fn test_normalization() {
        assert_eq!(parse_version("1.0-ALPHA").unwrap().to_string(), "1.0_alpha");
        assert_eq!(parse_version(" 1.2.3 ").unwrap().to_string(), "1.2.3");
    }

    #[test]
    fn test_errors() {
        assert_matches!(kinds(""), ParseVersionErrorKind::Empty);
        assert_matches!(kinds("  "), ParseVersionErrorKind::Empty);
        assert_matches!(
            kinds("1..2"),
            ParseVersionErrorKind::EmptyVersionComponent
        );
        assert_matches!(kinds("1.2!3"), ParseVersionErrorKind::EpochMustBeInteger);
        assert_matches!(
            kinds("1!2!3"),
            ParseVersionErrorKind::DuplicateEpochSeparator
        );
        assert_matches!(
            kinds("1+2+3"),
            ParseVersionErrorKind::DuplicateLocalSeparator
        );
        assert_matches!(kinds("a!1"), ParseVersionErrorKind::EpochMustBeInteger);
        assert_matches!(kinds("1.2 3"), ParseVersionErrorKind::InvalidCharacter(' '));
        assert_matches!(
            kinds("99999999999999999999999999"),
            ParseVersionErrorKind::InvalidNumeral
        );
        assert_matches!(
            kinds("1.0-a_b"),
            ParseVersionErrorKind::InvalidCharacter('-')
        );
    }
}
