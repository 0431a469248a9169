//! Durable store: long-lived chunks with no time dimension.
//!
//! Wraps a [`VectorIndex`] with append-only semantics. A chunk stays
//! visible to every search from the moment `add` returns until it is
//! explicitly removed. Chunks flagged ephemeral are refused with
//! [`RetrievalError::LifetimeViolation`].
//!
//! When opened over a SQLite pool, rows are written in one transaction
//! before they are indexed, and the whole table is reloaded into memory on
//! open. Writers are serialized by an async gate; readers only take the
//! index lock.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use docvault_core::embedding::{blob_to_vec, vec_to_blob};
use docvault_core::error::{RetrievalError, RetrievalResult};
use docvault_core::index::VectorIndex;
use docvault_core::models::{Chunk, EmbeddedChunk, Metadata, SearchResult, SourceOffset, StoreOrigin};
use docvault_core::store::RetrievalSource;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::migrate;
use crate::orchestrator::search_blocking;

pub struct DurableStore {
    index: RwLock<VectorIndex>,
    pool: Option<SqlitePool>,
    write_gate: Mutex<()>,
}

impl DurableStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(VectorIndex::new()),
            pool: None,
            write_gate: Mutex::new(()),
        }
    }

    /// Open a SQLite-backed store, creating the schema if needed and
    /// loading every persisted chunk into the index.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        migrate::run_migrations(&pool).await?;

        let rows = sqlx::query(
            "SELECT id, content, metadata_json, heading_path_json, start_offset, end_offset, embedding
             FROM durable_chunks ORDER BY created_at, id",
        )
        .fetch_all(&pool)
        .await
        .context("Failed to load durable chunks")?;

        let mut index = VectorIndex::new();
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            index
                .insert(Arc::new(chunk))
                .context("Persisted durable chunk does not fit the index")?;
        }
        tracing::info!(chunks = index.len(), "durable store loaded");

        Ok(Self {
            index: RwLock::new(index),
            pool: Some(pool),
            write_gate: Mutex::new(()),
        })
    }

    /// Add chunks, returning how many were new.
    ///
    /// The whole batch is rejected if any chunk is ephemeral or has the
    /// wrong dimensionality. Ids that are already stored are skipped: stored
    /// embeddings are never rewritten.
    pub async fn add(&self, chunks: Vec<EmbeddedChunk>) -> RetrievalResult<usize> {
        if let Some(bad) = chunks.iter().find(|c| c.is_ephemeral()) {
            tracing::error!(chunk_id = %bad.id(), store = %StoreOrigin::Durable, "lifetime violation");
            return Err(RetrievalError::LifetimeViolation {
                chunk_id: bad.id().to_string(),
                store: StoreOrigin::Durable,
                is_ephemeral: true,
            });
        }

        let _gate = self.write_gate.lock().await;

        let fresh: Vec<EmbeddedChunk> = {
            let index = self.read()?;
            let mut batch_dims = index.dims();
            let mut seen = HashSet::new();
            let mut fresh = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let vector = chunk.embedding();
                if vector.is_empty() {
                    return Err(RetrievalError::invalid(format!(
                        "chunk {} has an empty embedding",
                        chunk.id()
                    )));
                }
                let expected = *batch_dims.get_or_insert(vector.len());
                if expected != vector.len() {
                    return Err(RetrievalError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                if index.contains(chunk.id()) || !seen.insert(chunk.id().to_string()) {
                    tracing::debug!(chunk_id = %chunk.id(), "durable chunk already stored, skipping");
                    continue;
                }
                fresh.push(chunk);
            }
            fresh
        };

        if fresh.is_empty() {
            return Ok(0);
        }

        if let Some(pool) = &self.pool {
            persist(pool, &fresh).await.map_err(unavailable)?;
        }

        let added = fresh.len();
        let mut index = self.write()?;
        for chunk in fresh {
            index.insert(Arc::new(chunk))?;
        }
        tracing::debug!(added, total = index.len(), "durable chunks added");
        Ok(added)
    }

    /// Top-`k` chunks by ascending cosine distance.
    pub fn search(&self, query: &[f32], k: usize) -> RetrievalResult<Vec<SearchResult>> {
        let hits = self.read()?.search(query, k)?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                chunk: hit.chunk.chunk().clone(),
                score: hit.score,
                store_origin: StoreOrigin::Durable,
            })
            .collect())
    }

    /// Remove a chunk. Returns `false` if the id was unknown.
    pub async fn remove(&self, chunk_id: &str) -> RetrievalResult<bool> {
        let _gate = self.write_gate.lock().await;

        if !self.read()?.contains(chunk_id) {
            return Ok(false);
        }

        if let Some(pool) = &self.pool {
            sqlx::query("DELETE FROM durable_chunks WHERE id = ?")
                .bind(chunk_id)
                .execute(pool)
                .await
                .map_err(unavailable)?;
        }

        Ok(self.write()?.remove(chunk_id).is_some())
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.read().map(|i| i.contains(chunk_id)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RetrievalResult<RwLockReadGuard<'_, VectorIndex>> {
        self.index.read().map_err(|_| poisoned())
    }

    fn write(&self) -> RetrievalResult<RwLockWriteGuard<'_, VectorIndex>> {
        self.index.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl RetrievalSource for DurableStore {
    fn origin(&self) -> StoreOrigin {
        StoreOrigin::Durable
    }

    async fn retrieve(self: Arc<Self>, query: Arc<[f32]>, k: usize) -> RetrievalResult<Vec<SearchResult>> {
        search_blocking(StoreOrigin::Durable, move || self.search(&query, k)).await
    }
}

fn poisoned() -> RetrievalError {
    RetrievalError::store(StoreOrigin::Durable, "index lock poisoned")
}

fn unavailable(e: impl Display) -> RetrievalError {
    RetrievalError::store(StoreOrigin::Durable, e.to_string())
}

async fn persist(pool: &SqlitePool, chunks: &[EmbeddedChunk]) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    for embedded in chunks {
        let chunk = embedded.chunk();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO durable_chunks
                (id, content, metadata_json, heading_path_json, start_offset, end_offset,
                 is_ephemeral, embedding, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.content)
        .bind(serde_json::to_string(&chunk.metadata)?)
        .bind(serde_json::to_string(&chunk.heading_path)?)
        .bind(chunk.source_offset.start as i64)
        .bind(chunk.source_offset.end as i64)
        .bind(vec_to_blob(embedded.embedding()))
        .bind(embedded.embedding().len() as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

fn row_to_chunk(row: &SqliteRow) -> Result<EmbeddedChunk> {
    let metadata: Metadata = serde_json::from_str(&row.try_get::<String, _>("metadata_json")?)?;
    let heading_path: Vec<String> =
        serde_json::from_str(&row.try_get::<String, _>("heading_path_json")?)?;
    let embedding = blob_to_vec(&row.try_get::<Vec<u8>, _>("embedding")?);

    let chunk = Chunk {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        metadata,
        heading_path,
        source_offset: SourceOffset {
            start: row.try_get::<i64, _>("start_offset")? as usize,
            end: row.try_get::<i64, _>("end_offset")? as usize,
        },
        is_ephemeral: false,
    };
    Ok(EmbeddedChunk::new(chunk, embedding))
}
