//! Database ID type definition.

use serde::{Deserialize, Deserializer, de};

/// Alias for the integer type used for mapping to database IDs.
pub type DatabaseId = i64;

/// Deserialize an optional database ID that may be sent as either a JSON
/// number (`12`) or a string (`"12"`).
///
/// Offline clients rewrite temporary IDs with the server ID as a string, so
/// both encodings are accepted for foreign keys.
pub fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<DatabaseId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(DatabaseId),
        Text(String),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Number(id)) => Ok(Some(id)),
        Some(RawId::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawId::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("\"{text}\" is not a valid ID"))),
    }
}
