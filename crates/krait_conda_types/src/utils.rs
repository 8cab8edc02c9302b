//! Serde helpers shared between the repodata and prefix record types.

use serde::{Deserialize, Deserializer};

/// Deserializes a value that is either a list of strings or a single string
/// holding comma- or space-separated entries. `track_features` historically
/// appears in both shapes.
pub(crate) fn string_or_seq<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seq(Vec<String>),
        String(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::Seq(seq)) => seq,
        Some(Raw::String(string)) => string
            .split([',', ' '])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    })
}

/// (De)serialization of optional timestamps as milliseconds since the unix
/// epoch, the encoding used by repodata. Some very old repodata entries carry
/// seconds instead; anything before 1997 (conda did not exist) is interpreted
/// as seconds.
pub(crate) mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        timestamp: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match timestamp {
            Some(timestamp) => serializer.serialize_i64(timestamp.timestamp_millis()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        use serde::de::Error;
        let Some(mut value) = Option::<i64>::deserialize(deserializer)? else {
            return Ok(None);
        };
        // Convert seconds to milliseconds for timestamps older than 1997.
        if value < 853_200_000_000 {
            value *= 1000;
        }
        Utc.timestamp_millis_opt(value)
            .single()
            .map(Some)
            .ok_or_else(|| D::Error::custom("timestamp out of range"))
    }
}
