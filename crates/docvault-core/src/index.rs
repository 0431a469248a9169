//! Brute-force cosine similarity index.
//!
//! [`VectorIndex`] maps chunk ids to shared [`EmbeddedChunk`]s. Entries are
//! stored behind `Arc` so a caller can snapshot candidates under a lock and
//! score them after releasing it; a reader therefore always sees a whole
//! vector or none, never a partially written one.
//!
//! The index fixes its dimensionality on the first insert and rejects
//! vectors (and queries) of any other length.

use std::collections::HashMap;
use std::sync::Arc;

use crate::embedding::cosine_similarity;
use crate::error::{RetrievalError, RetrievalResult};
use crate::models::EmbeddedChunk;

/// A chunk with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<EmbeddedChunk>,
    pub score: f32,
}

#[derive(Debug, Default)]
pub struct VectorIndex {
    dims: Option<usize>,
    entries: HashMap<String, Arc<EmbeddedChunk>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims: Some(dims),
            entries: HashMap::new(),
        }
    }

    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<EmbeddedChunk>> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EmbeddedChunk>> {
        self.entries.values()
    }

    /// Verify a vector matches the index dimensionality.
    pub fn check_dims(&self, vector: &[f32]) -> RetrievalResult<()> {
        if vector.is_empty() {
            return Err(RetrievalError::invalid("embedding vector is empty"));
        }
        match self.dims {
            Some(expected) if expected != vector.len() => Err(RetrievalError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Insert or replace an entry, returning the previous one.
    pub fn insert(&mut self, chunk: Arc<EmbeddedChunk>) -> RetrievalResult<Option<Arc<EmbeddedChunk>>> {
        self.check_dims(chunk.embedding())?;
        self.dims.get_or_insert(chunk.embedding().len());
        Ok(self.entries.insert(chunk.id().to_string(), chunk))
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<EmbeddedChunk>> {
        self.entries.remove(id)
    }

    /// Top-`k` entries by cosine similarity to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> RetrievalResult<Vec<ScoredChunk>> {
        if self.dims.is_none() {
            return Ok(Vec::new());
        }
        self.check_dims(query)?;
        let mut ranked = rank(query, self.entries.values());
        ranked.truncate(k);
        Ok(ranked)
    }
}

/// Score and sort candidates against a query.
///
/// Sorted by descending similarity (ascending distance), ties broken by
/// ascending chunk id so the order is deterministic. Not truncated.
pub fn rank<'a, I>(query: &[f32], candidates: I) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = &'a Arc<EmbeddedChunk>>,
{
    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|chunk| ScoredChunk {
            score: cosine_similarity(query, chunk.embedding()),
            chunk: Arc::clone(chunk),
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.id().cmp(b.chunk.id()))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Metadata, SourceOffset};

    fn embedded(id: &str, vector: Vec<f32>) -> Arc<EmbeddedChunk> {
        Arc::new(EmbeddedChunk::new(
            Chunk {
                id: id.to_string(),
                content: format!("content of {}", id),
                metadata: Metadata::new(),
                heading_path: Vec::new(),
                source_offset: SourceOffset { start: 0, end: 0 },
                is_ephemeral: false,
            },
            vector,
        ))
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut index = VectorIndex::new();
        index.insert(embedded("far", vec![0.0, 1.0])).unwrap();
        index.insert(embedded("near", vec![1.0, 0.1])).unwrap();
        index.insert(embedded("exact", vec![1.0, 0.0])).unwrap();

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_ties_break_by_id() {
        let mut index = VectorIndex::new();
        index.insert(embedded("b", vec![1.0, 0.0])).unwrap();
        index.insert(embedded("a", vec![2.0, 0.0])).unwrap();
        let hits = index.search(&[1.0, 0.0], 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_dimension_fixed_on_first_insert() {
        let mut index = VectorIndex::new();
        index.insert(embedded("a", vec![1.0, 0.0, 0.0])).unwrap();
        assert_eq!(index.dims(), Some(3));
        let err = index.insert(embedded("b", vec![1.0])).unwrap_err();
        assert!(matches!(err, RetrievalError::DimensionMismatch { expected: 3, actual: 1 }));
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = VectorIndex::new();
        assert!(index.search(&[1.0, 2.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_insert_replaces_and_remove() {
        let mut index = VectorIndex::new();
        assert!(index.insert(embedded("a", vec![1.0])).unwrap().is_none());
        assert!(index.insert(embedded("a", vec![2.0])).unwrap().is_some());
        assert_eq!(index.len(), 1);
        assert!(index.remove("a").is_some());
        assert!(index.remove("a").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_rejects_empty_vector() {
        let mut index = VectorIndex::new();
        assert!(index.insert(embedded("a", Vec::new())).is_err());
    }
}
