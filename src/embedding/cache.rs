//! Bounded embedding cache.
//!
//! Keys are SHA-256 digests of `model || 0x00 || text`, so identical text
//! embedded by a different model never collides. Storage and eviction are
//! handled by `moka` (TinyLFU admission, size-bounded).

use std::sync::Arc;

use async_trait::async_trait;
use docvault_core::embedding::{check_batch, EmbeddingProvider};
use docvault_core::error::RetrievalResult;
use moka::sync::Cache;
use sha2::{Digest, Sha256};

type CacheKey = [u8; 32];

/// Wraps a provider and only forwards texts it has not seen recently.
pub struct CachedProvider {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Cache<CacheKey, Vec<f32>>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let cache = Cache::builder().max_capacity(capacity as u64).build();
        Self { inner, cache }
    }

    /// Approximate number of cached vectors.
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(&self, text: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.model_name().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());
        key
    }
}

#[async_trait]
impl EmbeddingProvider for CachedProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        let keys: Vec<CacheKey> = texts.iter().map(|t| self.key(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = keys.iter().map(|k| self.cache.get(k)).collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| results[i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed(&batch).await?;
            check_batch(&batch, &fresh)?;

            for (&i, vector) in missing.iter().zip(fresh) {
                self.cache.insert(keys[i], vector.clone());
                results[i] = Some(vector);
            }
        }

        tracing::debug!(
            total = texts.len(),
            misses = missing.len(),
            "embedding cache lookup"
        );

        Ok(results.into_iter().flatten().collect())
    }
}
