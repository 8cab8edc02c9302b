//! Serde helpers for hash fields.
//!
//! Repodata and prefix records store hashes as lowercase hex strings and leave
//! the field out entirely when the hash is unknown. The modules in here are
//! meant to be used with `#[serde(with = "...")]` on `Option<…Hash>` fields,
//! combined with `#[serde(default, skip_serializing_if = "Option::is_none")]`.

use digest::{Digest, Output};
use serde::{Deserialize, Deserializer, Serializer};

pub(crate) fn serialize_opt<D: Digest, S: Serializer>(
    hash: &Option<Output<D>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    <D as digest::OutputSizeUser>::OutputSize: std::ops::Add,
    <<D as digest::OutputSizeUser>::OutputSize as std::ops::Add>::Output:
        digest::generic_array::ArrayLength<u8>,
{
    match hash {
        Some(hash) => serializer.serialize_str(&crate::format_digest::<D>(hash)),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn deserialize_opt<'de, D: Digest, De: Deserializer<'de>>(
    deserializer: De,
) -> Result<Option<Output<D>>, De::Error> {
    use serde::de::Error;
    match Option::<String>::deserialize(deserializer)? {
        Some(str) => crate::parse_digest_from_hex::<D>(&str)
            .map(Some)
            .ok_or_else(|| De::Error::custom("malformed hex digest")),
        None => Ok(None),
    }
}

/// Hex (de)serialization of an `Option<Sha256Hash>`.
pub mod sha256_hex {
    use serde::{Deserializer, Serializer};

    use crate::{Sha256, Sha256Hash};

    /// Serializes an optional SHA256 hash as a hex string.
    pub fn serialize<S: Serializer>(
        hash: &Option<Sha256Hash>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        super::serialize_opt::<Sha256, S>(hash, serializer)
    }

    /// Deserializes an optional SHA256 hash from a hex string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Sha256Hash>, D::Error> {
        super::deserialize_opt::<Sha256, D>(deserializer)
    }
}

/// Hex (de)serialization of an `Option<Md5Hash>`.
pub mod md5_hex {
    use serde::{Deserializer, Serializer};

    use crate::{Md5, Md5Hash};

    /// Serializes an optional MD5 hash as a hex string.
    pub fn serialize<S: Serializer>(
        hash: &Option<Md5Hash>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        super::serialize_opt::<Md5, S>(hash, serializer)
    }

    /// Deserializes an optional MD5 hash from a hex string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Md5Hash>, D::Error> {
        super::deserialize_opt::<Md5, D>(deserializer)
    }
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    use crate::{Md5Hash, Sha256Hash};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Record {
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "super::sha256_hex"
        )]
        sha256: Option<Sha256Hash>,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "super::md5_hex"
        )]
        md5: Option<Md5Hash>,
    }

    #[test]
    fn test_round_trip() {
        let json = r#"{"sha256":"4fe086ac98f2a807bcbbeb1a0dd4e611cc4f1a5954a6a552c69744305acffb45","md5":"dede6252c964db3f3e41c7d30d07f6bf"}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert!(record.sha256.is_some());
        assert!(record.md5.is_some());
        assert_eq!(serde_json::to_string(&record).unwrap(), json);
    }

    #[test]
    fn test_missing_fields_are_none() {
        let record: Record = serde_json::from_str("{}").unwrap();
        assert_eq!(
            record,
            Record {
                sha256: None,
                md5: None
            }
        );
    }

    #[test]
    fn test_malformed_digest_is_an_error() {
        assert!(serde_json::from_str::<Record>(r#"{"sha256":"not-hex"}"#).is_err());
    }
}
