//! The `noarch` flavor of a package.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The noarch flavor of a package. `None` means the package is built for a
/// specific platform; `generic` packages are linked verbatim on every
/// platform; `python` packages additionally get their `site-packages/` and
/// `python-scripts/` paths rewritten at link time.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct NoArchType(pub Option<NoArchKind>);

/// The flavor of a noarch package.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum NoArchKind {
    /// Platform independent, linked verbatim.
    Generic,

    /// A pure-python package whose paths are rewritten against the python
    /// version found in the prefix.
    Python,
}

impl NoArchType {
    /// A package that is not noarch.
    pub fn none() -> Self {
        Self(None)
    }

    /// A `noarch: python` package.
    pub fn python() -> Self {
        Self(Some(NoArchKind::Python))
    }

    /// A `noarch: generic` package.
    pub fn generic() -> Self {
        Self(Some(NoArchKind::Generic))
    }

    /// Returns true if this is not a noarch package.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Returns true if this is a `noarch: python` package.
    pub fn is_python(&self) -> bool {
        matches!(self.0, Some(NoArchKind::Python))
    }

    /// Returns true if this is a `noarch: generic` package.
    pub fn is_generic(&self) -> bool {
        matches!(self.0, Some(NoArchKind::Generic))
    }
}

impl Serialize for NoArchType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            None => serializer.serialize_none(),
            Some(NoArchKind::Generic) => serializer.serialize_str("generic"),
            Some(NoArchKind::Python) => serializer.serialize_str("python"),
        }
    }
}

impl<'de> Deserialize<'de> for NoArchType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        /// Old repodata encodes `noarch: generic` as `noarch: true`.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            String(String),
        }

        use serde::de::Error;
        match Option::<Raw>::deserialize(deserializer)? {
            None | Some(Raw::Bool(false)) => Ok(NoArchType(None)),
            Some(Raw::Bool(true)) => Ok(NoArchType(Some(NoArchKind::Generic))),
            Some(Raw::String(str)) => match str.as_str() {
                "python" => Ok(NoArchType(Some(NoArchKind::Python))),
                "generic" => Ok(NoArchType(Some(NoArchKind::Generic))),
                other => Err(D::Error::custom(format!(
                    "invalid noarch type '{other}', expected 'python' or 'generic'"
                ))),
            },
        }
    }
}
