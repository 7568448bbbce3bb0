
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::database::{
    MAX_METADATA_LENGTH, MAX_SOURCE_LENGTH, MAX_TEXT_LENGTH, StoredHit, StoredRow, validate_id,
};
use crate::{KbError, Result};

/// A single metadata value. Nested objects are not representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Serialize metadata for the store, enforcing the column bound
pub fn metadata_to_json(metadata: &Metadata) -> Result<String> {
    let json = serde_json::to_string(metadata)
        .map_err(|e| KbError::Schema(format!("Failed to serialize metadata: {e}")))?;
    if json.len() > MAX_METADATA_LENGTH {
        return Err(KbError::Schema(format!(
            "Serialized metadata is {} bytes, limit is {MAX_METADATA_LENGTH}",
            json.len()
        )));
    }
    Ok(json)
}

/// Parse stored metadata; anything unreadable becomes an empty map
pub fn metadata_from_json(json: &str) -> Metadata {
    if json.trim().is_empty() {
        return Metadata::new();
    }
    serde_json::from_str(json).unwrap_or_else(|e| {
        warn!("Discarding malformed metadata ({}): {}", e, json);
        Metadata::new()
    })
}

/// A chunk with its embedding, ready to be written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub source: String,
    pub metadata: Metadata,
    /// Unix milliseconds
    pub created_at: i64,
}

impl DocumentRecord {
    /// Flatten into the store row layout, checking every column bound
    pub fn to_stored_row(&self, dimension: usize) -> Result<StoredRow> {
        validate_id(&self.id)?;

        if self.vector.len() != dimension {
            return Err(KbError::Schema(format!(
                "Document '{}' has a {}-dimensional vector, collection expects {}",
                self.id,
                self.vector.len(),
                dimension
            )));
        }
        if self.text.len() > MAX_TEXT_LENGTH {
            return Err(KbError::Schema(format!(
                "Document '{}' text is {} bytes, limit is {MAX_TEXT_LENGTH}",
                self.id,
                self.text.len()
            )));
        }
        if self.source.len() > MAX_SOURCE_LENGTH {
            return Err(KbError::Schema(format!(
                "Document '{}' source is {} bytes, limit is {MAX_SOURCE_LENGTH}",
                self.id,
                self.source.len()
            )));
        }

        Ok(StoredRow {
            id: self.id.clone(),
            vector: self.vector.clone(),
            text: self.text.clone(),
            source: self.source.clone(),
            metadata: metadata_to_json(&self.metadata)?,
            created_at: self.created_at,
        })
    }
}

/// Caller-supplied text waiting to be chunked and embedded
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentInput {
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DocumentInput {
    #[inline]
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            metadata: Metadata::new(),
        }
    }

    #[inline]
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub text: String,
    pub source: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl From<StoredHit> for QueryResult {
    fn from(hit: StoredHit) -> Self {
        Self {
            metadata: metadata_from_json(&hit.row.metadata),
            id: hit.row.id,
            text: hit.row.text,
            source: hit.row.source,
            score: hit.score,
        }
    }
}
