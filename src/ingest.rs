//! Ingestion pipeline: chunk, embed in batches, route by lifetime.
//!
//! The caller decides whether a document is durable or ephemeral; nothing
//! here infers it. Every chunk of a document gets the same `is_ephemeral`
//! flag and a `timestamp` metadata field (RFC 3339) unless the document
//! already carries one.
//!
//! When `heading_weight > 0` the heading lineage is prepended to the text
//! sent to the embedding provider so that section titles pull on the
//! vector. Stored chunk content is never modified.

use std::sync::Arc;
use std::time::Duration;

use docvault_core::chunk::{chunk_document, ChunkingConfig};
use docvault_core::embedding::{check_batch, EmbeddingProvider};
use docvault_core::error::{RetrievalError, RetrievalResult};
use docvault_core::metadata::AllowedKey;
use docvault_core::models::{Chunk, Document, EmbeddedChunk, StoreOrigin};
use serde::Serialize;

use crate::durable::DurableStore;
use crate::ephemeral::EphemeralStore;

/// Which store a document's chunks go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Durable,
    Ephemeral { ttl: Duration },
}

impl Lifetime {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Lifetime::Ephemeral { .. })
    }

    pub fn origin(&self) -> StoreOrigin {
        match self {
            Lifetime::Durable => StoreOrigin::Durable,
            Lifetime::Ephemeral { .. } => StoreOrigin::Ephemeral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source_path: String,
    pub store: StoreOrigin,
    pub chunks: usize,
    pub batches: usize,
    /// Chunks the store accepted as new.
    pub stored: usize,
}

pub struct Ingestor {
    chunking: ChunkingConfig,
    batch_size: usize,
    provider: Arc<dyn EmbeddingProvider>,
    durable: Arc<DurableStore>,
    ephemeral: Arc<EphemeralStore>,
}

impl Ingestor {
    pub fn new(
        chunking: ChunkingConfig,
        batch_size: usize,
        provider: Arc<dyn EmbeddingProvider>,
        durable: Arc<DurableStore>,
        ephemeral: Arc<EphemeralStore>,
    ) -> RetrievalResult<Self> {
        chunking.validate()?;
        if batch_size == 0 {
            return Err(RetrievalError::invalid("batch_size must be > 0"));
        }
        Ok(Self {
            chunking,
            batch_size,
            provider,
            durable,
            ephemeral,
        })
    }

    pub async fn ingest(&self, document: &Document, lifetime: Lifetime) -> RetrievalResult<IngestReport> {
        if let Lifetime::Ephemeral { ttl } = lifetime {
            if ttl.is_zero() {
                return Err(RetrievalError::invalid("ttl must be > 0"));
            }
        }

        let chunks = self.prepare(document, lifetime)?;
        let mut report = IngestReport {
            source_path: document.source_path.clone(),
            store: lifetime.origin(),
            chunks: chunks.len(),
            batches: chunks.len().div_ceil(self.batch_size),
            stored: 0,
        };
        if chunks.is_empty() {
            tracing::debug!(source = %document.source_path, "document produced no chunks");
            return Ok(report);
        }

        let embedded = self.embed_chunks(chunks).await?;

        report.stored = match lifetime {
            Lifetime::Durable => self.durable.add(embedded).await?,
            Lifetime::Ephemeral { ttl } => self.ephemeral.add(embedded, ttl)?,
        };

        tracing::info!(
            source = %report.source_path,
            store = %report.store,
            chunks = report.chunks,
            stored = report.stored,
            "document ingested"
        );
        Ok(report)
    }

    /// Chunk a document and mark every chunk with its lifetime.
    pub fn prepare(&self, document: &Document, lifetime: Lifetime) -> RetrievalResult<Vec<Chunk>> {
        let timestamp_key = AllowedKey::Timestamp.as_str();
        let chunks = if document.metadata.contains_key(timestamp_key) {
            chunk_document(document, &self.chunking)?
        } else {
            let mut stamped = document.clone();
            stamped
                .metadata
                .insert(timestamp_key.to_string(), chrono::Utc::now().to_rfc3339());
            chunk_document(&stamped, &self.chunking)?
        };

        Ok(chunks
            .into_iter()
            .map(|chunk| chunk.with_lifetime(lifetime.is_ephemeral()))
            .collect())
    }

    /// Embed chunks in provider batches, preserving order.
    pub async fn embed_chunks(&self, chunks: Vec<Chunk>) -> RetrievalResult<Vec<EmbeddedChunk>> {
        let mut embedded = Vec::with_capacity(chunks.len());
        let mut remaining = chunks.into_iter().peekable();

        while remaining.peek().is_some() {
            let batch: Vec<Chunk> = remaining.by_ref().take(self.batch_size).collect();
            let texts: Vec<String> = batch
                .iter()
                .map(|c| embedding_text(c, self.chunking.heading_weight))
                .collect();

            let vectors = self.provider.embed(&texts).await?;
            check_batch(&texts, &vectors)?;

            embedded.extend(
                batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| EmbeddedChunk::new(chunk, vector)),
            );
        }

        Ok(embedded)
    }
}

/// The text handed to the embedding provider for a chunk.
pub fn embedding_text(chunk: &Chunk, heading_weight: f32) -> String {
    if heading_weight > 0.0 && !chunk.heading_path.is_empty() {
        format!("{}\n\n{}", chunk.heading_label(), chunk.content)
    } else {
        chunk.content.clone()
    }
}
