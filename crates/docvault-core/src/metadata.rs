//! Allow-listed metadata for the ephemeral boundary.
//!
//! Ephemeral chunks keep only the keys named by [`AllowedKey`]. The
//! allow-list is a closed enum rather than a set of strings, so the set of
//! fields that can cross the boundary is fixed at compile time.

use serde::Serialize;

use crate::models::Metadata;

/// Metadata keys permitted on ephemeral chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowedKey {
    Timestamp,
    Source,
    Type,
}

impl AllowedKey {
    pub const ALL: [AllowedKey; 3] = [AllowedKey::Timestamp, AllowedKey::Source, AllowedKey::Type];

    pub fn as_str(&self) -> &'static str {
        match self {
            AllowedKey::Timestamp => "timestamp",
            AllowedKey::Source => "source",
            AllowedKey::Type => "type",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

/// Metadata reduced to the allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SanitizedMetadata {
    pub timestamp: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
}

impl SanitizedMetadata {
    /// Keep allow-listed keys and drop everything else.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mut out = Self::default();
        for (key, value) in metadata {
            match AllowedKey::parse(key) {
                Some(AllowedKey::Timestamp) => out.timestamp = Some(value.clone()),
                Some(AllowedKey::Source) => out.source = Some(value.clone()),
                Some(AllowedKey::Type) => out.doc_type = Some(value.clone()),
                None => {}
            }
        }
        out
    }

    pub fn into_metadata(self) -> Metadata {
        let mut map = Metadata::new();
        let fields = [
            (AllowedKey::Timestamp, self.timestamp),
            (AllowedKey::Source, self.source),
            (AllowedKey::Type, self.doc_type),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                map.insert(key.as_str().to_string(), value);
            }
        }
        map
    }
}

/// Reduce `metadata` to the allow-listed keys.
pub fn sanitize(metadata: &Metadata) -> Metadata {
    SanitizedMetadata::from_metadata(metadata).into_metadata()
}
