//! Version types for conda packages.
//!
//! A conda version string consists of an optional epoch (`1!`), a version
//! part, and an optional local part (`+1.2`). The version and local parts are
//! split into *segments* at `.`, and every segment is split into *components*:
//! pairs of a numeral and a literal. Versions are compared lexicographically
//! over their segments, where a missing component counts as `0` with an empty
//! literal, so `1.1 == 1.1.0` and `1.1a1 < 1.1`.
//!
//! The literal part of a component has a special ordering, from smallest to
//! largest:
//!
//! ```txt
//! * < dev < _ < <any other literal> < <empty> < post
//! ```
//!
//! Literals are compared case-insensitively (versions are lowercased during
//! parsing). The resulting order looks like this:
//!
//! ```txt
//!       0.4
//!     < 0.4.1.rc
//!     < 0.4.1
//!     < 0.5a1
//!     < 0.5
//!     < 1.1dev1
//!     < 1.1_
//!     < 1.1a1
//!     < 1.1.0
//!    == 1.1
//!     < 1.1.post1
//!     < 1!0.4.1
//! ```

mod parse;

use std::{
    cmp::Ordering,
    fmt,
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

pub use parse::{ParseVersionError, ParseVersionErrorKind};

/// The literal part of a version component, with the conda-specific ordering
/// described in the [module documentation](self).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Literal {
    /// A `*`, only meaningful when a version is used as a glob pattern.
    Star,
    /// The string `dev`, ordered before everything except `*`.
    Dev,
    /// A lone `_`, the openssl-style "just below any letter" marker.
    Underscore,
    /// Any other (lowercased) literal string.
    Other(Box<str>),
    /// The absence of a literal, i.e. a purely numeric component.
    Empty,
    /// The string `post`, ordered after everything else.
    Post,
}

impl Literal {
    fn rank(&self) -> u8 {
        match self {
            Literal::Star => 0,
            Literal::Dev => 1,
            Literal::Underscore => 2,
            Literal::Other(_) => 3,
            Literal::Empty => 4,
            Literal::Post => 5,
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Literal::Star => "*",
            Literal::Dev => "dev",
            Literal::Underscore => "_",
            Literal::Other(s) => s,
            Literal::Empty => "",
            Literal::Post => "post",
        }
    }
}

impl Ord for Literal {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Literal::Other(a), Literal::Other(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Literal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A single version component: a numeral paired with a literal. `1.2g.beta15`
/// parses into the components `(1, "")`, `(2, "g")`, `(0, "beta")`, `(15, "")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Component {
    pub numeral: u64,
    pub literal: Literal,
}

impl Component {
    /// The value a missing component compares as.
    pub(crate) const IMPLICIT: Component = Component {
        numeral: 0,
        literal: Literal::Empty,
    };

    fn is_implicit(&self) -> bool {
        self == &Self::IMPLICIT
    }
}

/// A version segment: the components between two dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Segment(pub(crate) SmallVec<[Component; 2]>);

impl Segment {
    pub(crate) fn components(&self) -> &[Component] {
        &self.0
    }
}

fn cmp_components(a: &[Component], b: &[Component]) -> Ordering {
    for pair in a.iter().zip_longest(b.iter()) {
        let ord = match pair {
            EitherOrBoth::Both(left, right) => left.cmp(right),
            EitherOrBoth::Left(left) => left.cmp(&Component::IMPLICIT),
            EitherOrBoth::Right(right) => Component::IMPLICIT.cmp(right),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn cmp_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    const EMPTY: &[Component] = &[];
    for pair in a.iter().zip_longest(b.iter()) {
        let ord = match pair {
            EitherOrBoth::Both(left, right) => cmp_components(left.components(), right.components()),
            EitherOrBoth::Left(left) => cmp_components(left.components(), EMPTY),
            EitherOrBoth::Right(right) => cmp_components(EMPTY, right.components()),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// A parsed conda version.
///
/// Versions parse through [`FromStr`] and retain their normalized source
/// string, so a canonically formatted version round-trips through
/// [`Display`]. Comparison, equality and hashing operate on the parsed
/// components (`1.1 == 1.1.0`).
#[derive(Clone)]
pub struct Version {
    /// The trimmed, lowercased source string (dashes normalized to
    /// underscores when the source contains no underscore).
    norm: Box<str>,

    /// The epoch, or `None` when the source did not carry one. An absent
    /// epoch compares as `0`.
    epoch: Option<u64>,

    /// The segments of the version part.
    segments: Vec<Segment>,

    /// The segments of the local part (after `+`), empty when there is none.
    local: Vec<Segment>,
}

impl Version {
    /// Returns the epoch of the version, `0` when none was given.
    pub fn epoch(&self) -> u64 {
        self.epoch.unwrap_or(0)
    }

    /// Returns true if the version carries an explicit epoch.
    pub fn has_epoch(&self) -> bool {
        self.epoch.is_some()
    }

    /// Returns true if the version has a local part (`1.2+3`).
    pub fn has_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// Returns the first two numerals of the version, if it has at least two
    /// segments that start with a numeral. `3.9.1` yields `(3, 9)`.
    pub fn as_major_minor(&self) -> Option<(u64, u64)> {
        let major = self.segments.first()?.components().first()?;
        let minor = self.segments.get(1)?.components().first()?;
        Some((major.numeral, minor.numeral))
    }

    /// Returns true if this version starts with `prefix`, the relation behind
    /// `=1.2` and `1.2.*` style constraints. The epochs must match and every
    /// segment of the prefix must equal the corresponding segment of `self`,
    /// except the last one which only needs to be a component-wise prefix.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        if self.epoch() != prefix.epoch() {
            return false;
        }
        if !segments_start_with(&self.segments, &prefix.segments) {
            return false;
        }
        if prefix.has_local() {
            return segments_start_with(&self.local, &prefix.local);
        }
        true
    }

    /// Returns true if this version is "compatible" with `other` in the sense
    /// of the `~=` operator: at least `other`, and starting with `other` minus
    /// its last segment.
    pub fn compatible_with(&self, other: &Self) -> bool {
        if self < other {
            return false;
        }
        if other.segments.len() <= 1 {
            return true;
        }
        self.epoch() == other.epoch()
            && segments_start_with(
                &self.segments,
                &other.segments[..other.segments.len() - 1],
            )
    }

    /// The segments of the version part, used by sibling modules.
    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segments with trailing implicit components removed, and trailing
    /// all-implicit segments dropped entirely. Two equal versions always
    /// produce the same trimmed form, which makes it suitable for hashing.
    fn trimmed<'a>(segments: &'a [Segment]) -> impl Iterator<Item = &'a [Component]> + 'a {
        let last_significant = segments
            .iter()
            .rposition(|segment| !segment.components().iter().all(Component::is_implicit))
            .map_or(0, |idx| idx + 1);
        segments[..last_significant].iter().map(|segment| {
            let components = segment.components();
            let len = components
                .iter()
                .rposition(|c| !c.is_implicit())
                .map_or(0, |idx| idx + 1);
            &components[..len]
        })
    }
}

/// Returns true if `segments` starts with `prefix`: all but the last prefix
/// segment must compare equal, the last must be a component-wise prefix.
fn segments_start_with(segments: &[Segment], prefix: &[Segment]) -> bool {
    const EMPTY: &[Component] = &[];
    let Some((last, head)) = prefix.split_last() else {
        return true;
    };
    for (idx, prefix_segment) in head.iter().enumerate() {
        let own = segments.get(idx).map_or(EMPTY, Segment::components);
        if cmp_components(own, prefix_segment.components()) != Ordering::Equal {
            return false;
        }
    }
    let own = segments.get(head.len()).map_or(EMPTY, Segment::components);
    for (idx, component) in last.components().iter().enumerate() {
        let own_component = own.get(idx).unwrap_or(&Component::IMPLICIT);
        if own_component != component {
            return false;
        }
    }
    true
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch()
            .cmp(&other.epoch())
            .then_with(|| cmp_segments(&self.segments, &other.segments))
            .then_with(|| cmp_segments(&self.local, &other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch().hash(state);
        for components in Self::trimmed(&self.segments) {
            components.hash(state);
        }
        // Separate version and local parts so `1.1+1` and `1.1.1` differ.
        u8::MAX.hash(state);
        for components in Self::trimmed(&self.local) {
            components.hash(state);
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.norm)
    }
}

impl Debug for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Version(\"{}\")", self.norm)
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_version(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.norm)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

impl Version {
    pub(crate) fn from_parts(
        norm: Box<str>,
        epoch: Option<u64>,
        segments: Vec<Segment>,
        local: Vec<Segment>,
    ) -> Self {
        Self {
            norm,
            epoch,
            segments,
            local,
        }
    }
}
