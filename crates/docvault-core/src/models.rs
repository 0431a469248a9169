//! Core data models used throughout docvault.
//!
//! These types represent the documents, chunks, embedded chunks, and search
//! results that flow from ingestion through the stores to the orchestrator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered string metadata. Ordered so serialized chunks are byte-stable.
pub type Metadata = BTreeMap<String, String>;

/// A source document as read by the (external) ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub source_path: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(source_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source_path: source_path.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Byte range `[start, end)` of a chunk within its document's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceOffset {
    pub start: usize,
    pub end: usize,
}

impl SourceOffset {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A bounded unit of document text with heading lineage and offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from `(source_path, start, end)`.
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// Heading titles from the outermost section inwards.
    pub heading_path: Vec<String>,
    pub source_offset: SourceOffset,
    /// Set by the caller before storage; never inferred.
    pub is_ephemeral: bool,
}

impl Chunk {
    /// Heading lineage rendered as `"Project X > Risks"`.
    pub fn heading_label(&self) -> String {
        self.heading_path.join(" > ")
    }

    pub fn with_lifetime(mut self, is_ephemeral: bool) -> Self {
        self.is_ephemeral = is_ephemeral;
        self
    }
}

/// A [`Chunk`] paired with its embedding vector.
///
/// The vector cannot be mutated after construction. A chunk whose content
/// changes must be re-chunked under a new id and embedded again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedChunk {
    chunk: Chunk,
    embedding: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }

    pub fn id(&self) -> &str {
        &self.chunk.id
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn is_ephemeral(&self) -> bool {
        self.chunk.is_ephemeral
    }

    pub fn into_parts(self) -> (Chunk, Vec<f32>) {
        (self.chunk, self.embedding)
    }
}

/// Which store a search result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOrigin {
    Durable,
    Ephemeral,
}

impl fmt::Display for StoreOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOrigin::Durable => f.write_str("durable"),
            StoreOrigin::Ephemeral => f.write_str("ephemeral"),
        }
    }
}

/// A single scored hit. Produced per query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`; higher is closer.
    pub score: f32,
    pub store_origin: StoreOrigin,
}

impl SearchResult {
    /// Cosine distance, `1 - score`.
    pub fn distance(&self) -> f32 {
        1.0 - self.score
    }
}
