//! Match specs: the requirement expressions of the conda ecosystem.
//!
//! A match spec selects a set of packages by name, version, build and
//! provenance:
//!
//! ```txt
//! [channel["/"subdir]"::"]name[version[build]]["["key"="value(","key"="value")*"]"]
//! ```
//!
//! Examples: `numpy`, `numpy >=1.8,<2`, `numpy=1.8=py37_0`,
//! `conda-forge::python[build_number=">=2"]`.

use std::{
    fmt,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use krait_digest::{parse_digest_from_hex, Md5, Md5Hash, Sha256, Sha256Hash};
use thiserror::Error;
use url::Url;

use crate::{
    build_number_spec::ParseBuildNumberSpecError,
    package::ArchiveIdentifier,
    string_matcher::ParseStringMatcherError,
    version_spec::ParseVersionSpecError,
    BuildNumberSpec, PackageName, PackageRecord, ParsePackageNameError, RepoDataRecord,
    StringMatcher, VersionSpec,
};

/// A parsed requirement over packages.
///
/// Equality and hashing are defined on the canonical textual form produced by
/// [`Display`], so `numpy >=1.8` and `numpy[version=">=1.8"]` compare equal.
#[derive(Debug, Clone, Default)]
pub struct MatchSpec {
    /// The name of the package.
    pub name: Option<PackageName>,

    /// The version constraint.
    pub version: Option<VersionSpec>,

    /// The build string constraint (exact or glob).
    pub build: Option<StringMatcher>,

    /// The build number constraint.
    pub build_number: Option<BuildNumberSpec>,

    /// Match only records with this exact archive filename.
    pub file_name: Option<String>,

    /// Match only records from this channel.
    pub channel: Option<String>,

    /// Match only records from this subdir.
    pub subdir: Option<String>,

    /// The namespace of the requirement. Parsed and rendered, resolution is
    /// left to the pool's namespace table.
    pub namespace: Option<String>,

    /// Match only an archive with this MD5 hash.
    pub md5: Option<Md5Hash>,

    /// Match only an archive with this SHA256 hash.
    pub sha256: Option<Sha256Hash>,

    /// Match a single package archive by URL.
    pub url: Option<Url>,
}

impl MatchSpec {
    /// Returns true if `record` satisfies the name, version, build, build
    /// number, subdir and hash constraints of this spec.
    pub fn matches(&self, record: &PackageRecord) -> bool {
        if let Some(name) = &self.name {
            if name != &record.name {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if !version.matches(&record.version) {
                return false;
            }
        }
        if let Some(build) = &self.build {
            if !build.matches(&record.build) {
                return false;
            }
        }
        if let Some(build_number) = &self.build_number {
            if !build_number.matches(record.build_number) {
                return false;
            }
        }
        if let Some(subdir) = &self.subdir {
            if subdir != &record.subdir {
                return false;
            }
        }
        if let Some(md5) = &self.md5 {
            if record.md5.as_ref() != Some(md5) {
                return false;
            }
        }
        if let Some(sha256) = &self.sha256 {
            if record.sha256.as_ref() != Some(sha256) {
                return false;
            }
        }
        true
    }

    /// Like [`MatchSpec::matches`] but additionally checks the provenance
    /// constraints (channel, filename and URL) against a repodata record.
    pub fn matches_record(&self, record: &RepoDataRecord) -> bool {
        if !self.matches(&record.package_record) {
            return false;
        }
        if let Some(channel) = &self.channel {
            if record.channel.as_deref() != Some(channel.as_str()) {
                return false;
            }
        }
        if let Some(file_name) = &self.file_name {
            if file_name != &record.file_name {
                return false;
            }
        }
        if let Some(url) = &self.url {
            if url != &record.url {
                return false;
            }
        }
        true
    }

    /// Constructs a spec that matches only the given name.
    pub fn from_name(name: PackageName) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }
}

/// An error that occurred while parsing a match spec.
#[derive(Debug, Error)]
pub enum ParseMatchSpecError {
    /// The spec had no package name.
    #[error("missing package name")]
    MissingName,

    /// The package name was invalid.
    #[error(transparent)]
    InvalidPackageName(#[from] ParsePackageNameError),

    /// The version constraint was invalid.
    #[error(transparent)]
    InvalidVersionSpec(#[from] ParseVersionSpecError),

    /// The build constraint was invalid.
    #[error(transparent)]
    InvalidBuildMatcher(#[from] ParseStringMatcherError),

    /// The build number constraint was invalid.
    #[error(transparent)]
    InvalidBuildNumberSpec(#[from] ParseBuildNumberSpecError),

    /// A bracket section could not be parsed.
    #[error("unable to parse bracket section '{0}'")]
    InvalidBracket(String),

    /// A bracket key is not part of the grammar.
    #[error("unknown bracket key '{0}'")]
    UnknownBracketKey(String),

    /// A hash value was not valid hex of the right length.
    #[error("invalid {0} hash '{1}'")]
    InvalidHash(&'static str, String),

    /// The URL was malformed.
    #[error("invalid package url '{0}'")]
    InvalidUrl(String),
}

impl FromStr for MatchSpec {
    type Err = ParseMatchSpecError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        // Strip a trailing comment.
        let input = match input.split_once('#') {
            Some((spec, _comment)) => spec,
            None => input,
        };
        let mut input = input.trim();
        let mut spec = MatchSpec::default();

        // A direct URL selects exactly one archive.
        if input.contains("://") && !input.contains("::") {
            let url = Url::parse(input)
                .map_err(|_| ParseMatchSpecError::InvalidUrl(input.to_string()))?;
            let file_name = url
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(String::from));
            if let Some(file_name) = &file_name {
                if let Some(identifier) = ArchiveIdentifier::try_from_filename(file_name) {
                    spec.name = Some(identifier.name.parse()?);
                }
            }
            spec.file_name = file_name;
            spec.url = Some(url);
            return Ok(spec);
        }

        // Brackets come last in the grammar, strip them off first.
        if let Some(without_brackets) = input.strip_suffix(']') {
            let (rest, brackets) = without_brackets
                .rsplit_once('[')
                .ok_or_else(|| ParseMatchSpecError::InvalidBracket(input.to_string()))?;
            parse_brackets(brackets, &mut spec)?;
            input = rest.trim();
        }

        // Channel (and optional subdir) prefix.
        if let Some((channel_part, rest)) = input.split_once("::") {
            if !channel_part.is_empty() {
                match channel_part.split_once('/') {
                    Some((channel, subdir)) => {
                        spec.channel = Some(channel.to_string());
                        spec.subdir = Some(subdir.to_string());
                    }
                    None => spec.channel = Some(channel_part.to_string()),
                }
            }
            input = rest.trim();
        }

        // Name, possibly prefixed by a namespace.
        let name_end = input
            .find(|c: char| c.is_whitespace() || matches!(c, '=' | '<' | '>' | '!' | '~'))
            .unwrap_or(input.len());
        let (name_part, rest) = input.split_at(name_end);
        let name_part = match name_part.split_once(':') {
            Some((namespace, name)) => {
                spec.namespace = Some(namespace.to_string());
                name
            }
            None => name_part,
        };
        if name_part.is_empty() {
            return Err(ParseMatchSpecError::MissingName);
        }
        spec.name = Some(name_part.parse()?);

        // Version and build.
        let rest = rest.trim();
        if !rest.is_empty() {
            let (version, build) = split_version_and_build(rest);
            if !version.is_empty() && spec.version.is_none() {
                spec.version = Some(version.parse()?);
            }
            if let Some(build) = build {
                if spec.build.is_none() {
                    spec.build = Some(build.parse()?);
                }
            }
        }

        Ok(spec)
    }
}

/// Splits a bracket section at commas, ignoring commas inside quoted values
/// (`version=">=1.8,<2"` is one pair).
fn split_bracket_pairs(brackets: &str) -> Vec<&str> {
    let mut pairs = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, c) in brackets.char_indices() {
        match (quote, c) {
            (Some(open), _) if c == open => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            (None, ',') => {
                pairs.push(&brackets[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    pairs.push(&brackets[start..]);
    pairs
}

/// Parses the inside of a bracket section (`key=value,key=value`).
fn parse_brackets(brackets: &str, spec: &mut MatchSpec) -> Result<(), ParseMatchSpecError> {
    for pair in split_bracket_pairs(brackets) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ParseMatchSpecError::InvalidBracket(pair.to_string()))?;
        let key = key.trim();
        let value = value.trim().trim_matches(|c| matches!(c, '"' | '\''));
        match key {
            "version" => spec.version = Some(value.parse()?),
            "build" => spec.build = Some(value.parse()?),
            "build_number" => spec.build_number = Some(value.parse()?),
            "fn" => spec.file_name = Some(value.to_string()),
            "channel" => spec.channel = Some(value.to_string()),
            "subdir" => spec.subdir = Some(value.to_string()),
            "md5" => {
                spec.md5 = Some(
                    parse_digest_from_hex::<Md5>(value)
                        .ok_or_else(|| ParseMatchSpecError::InvalidHash("md5", value.into()))?,
                );
            }
            "sha256" => {
                spec.sha256 =
                    Some(parse_digest_from_hex::<Sha256>(value).ok_or_else(|| {
                        ParseMatchSpecError::InvalidHash("sha256", value.into())
                    })?);
            }
            "url" => {
                spec.url = Some(
                    Url::parse(value)
                        .map_err(|_| ParseMatchSpecError::InvalidUrl(value.to_string()))?,
                );
            }
            other => return Err(ParseMatchSpecError::UnknownBracketKey(other.to_string())),
        }
    }
    Ok(())
}

/// Splits the part after the package name into a version expression and an
/// optional build string.
///
/// `=1.8=py37_0` uses the `name=version=build` convention; otherwise the
/// build is the last whitespace-separated token, provided it cannot be part
/// of a version expression.
fn split_version_and_build(input: &str) -> (String, Option<&str>) {
    if let Some(stripped) = input.strip_prefix('=') {
        if !stripped.starts_with('=') {
            if let Some((version, build)) = stripped.split_once('=') {
                return (format!("={version}"), Some(build));
            }
        }
    }

    let tokens: Vec<&str> = input.split_whitespace().collect();
    if tokens.len() > 1 {
        let last = tokens[tokens.len() - 1];
        let previous = tokens[tokens.len() - 2];
        let last_is_build = !last
            .chars()
            .any(|c| matches!(c, '=' | '<' | '>' | '!' | '~' | ',' | '|'))
            && !previous.ends_with([',', '|']);
        if last_is_build {
            return (tokens[..tokens.len() - 1].concat(), Some(last));
        }
    }
    (tokens.concat(), None)
}

impl Display for MatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}")?;
            if let Some(subdir) = &self.subdir {
                write!(f, "/{subdir}")?;
            }
            write!(f, "::")?;
        }
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}:")?;
        }
        match &self.name {
            Some(name) => write!(f, "{}", name.as_normalized())?,
            None => write!(f, "*")?,
        }
        if let Some(version) = &self.version {
            write!(f, " {version}")?;
        }
        if let Some(build) = &self.build {
            write!(f, " {build}")?;
        }

        // The remaining fields render as a sorted bracket list.
        let mut brackets = Vec::new();
        if let Some(build_number) = &self.build_number {
            brackets.push(format!("build_number=\"{build_number}\""));
        }
        if let Some(file_name) = &self.file_name {
            brackets.push(format!("fn=\"{file_name}\""));
        }
        if let Some(md5) = &self.md5 {
            brackets.push(format!("md5=\"{md5:x}\""));
        }
        if let Some(sha256) = &self.sha256 {
            brackets.push(format!("sha256=\"{sha256:x}\""));
        }
        if self.channel.is_none() {
            if let Some(subdir) = &self.subdir {
                brackets.push(format!("subdir=\"{subdir}\""));
            }
        }
        if let Some(url) = &self.url {
            brackets.push(format!("url=\"{url}\""));
        }
        if !brackets.is_empty() {
            brackets.sort();
            write!(f, "[{}]", brackets.join(","))?;
        }
        Ok(())
    }
}

impl PartialEq for MatchSpec {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for MatchSpec {}

impl Hash for MatchSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl serde::Serialize for MatchSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for MatchSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::Deserialize;
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}
