//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helpers for vector serialization and similarity.
//!
//! Concrete providers (OpenAI, Ollama, the caching wrapper) live in the
//! `docvault` crate. The embedding model itself is treated as an external
//! numeric function.

use async_trait::async_trait;

use crate::error::{RetrievalError, RetrievalResult};

/// A batch text → vector function.
///
/// Implementations are called with whole batches, never one chunk at a
/// time. Any provider failure must surface as
/// [`RetrievalError::EmbeddingUnavailable`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>>;
}

/// Embed a single query text.
///
/// Convenience wrapper around [`EmbeddingProvider::embed`] that also checks
/// the provider returned exactly one vector.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> RetrievalResult<Vec<f32>> {
    let mut vectors = provider.embed(&[text.to_string()]).await?;
    if vectors.len() != 1 {
        return Err(RetrievalError::embedding(format!(
            "expected 1 vector for query, provider returned {}",
            vectors.len()
        )));
    }
    Ok(vectors.remove(0))
}

/// Check that a provider answered a batch with one vector per input.
pub fn check_batch(texts: &[String], vectors: &[Vec<f32>]) -> RetrievalResult<()> {
    if texts.len() != vectors.len() {
        return Err(RetrievalError::embedding(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }
    Ok(())
}

/// Reject vectors whose length differs from the provider's declared
/// dimensionality.
pub fn check_dims(vectors: &[Vec<f32>], dims: usize) -> RetrievalResult<()> {
    match vectors.iter().find(|v| v.len() != dims) {
        Some(bad) => Err(RetrievalError::DimensionMismatch {
            expected: dims,
            actual: bad.len(),
        }),
        None => Ok(()),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use docvault_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` for empty vectors,
/// zero vectors, or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_check_batch_count_mismatch() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = check_batch(&texts, &[vec![1.0]]).unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingUnavailable { .. }));
    }

    #[test]
    fn test_check_dims_rejects_short_vector() {
        assert!(check_dims(&[vec![0.0; 3], vec![1.0; 3]], 3).is_ok());
        let err = check_dims(&[vec![0.0; 3], vec![1.0; 2]], 3).unwrap_err();
        assert!(matches!(err, RetrievalError::DimensionMismatch { expected: 3, actual: 2 }));
    }
}
