//! Error taxonomy shared by every retrieval component.
//!
//! Structural violations ([`RetrievalError::LifetimeViolation`],
//! [`RetrievalError::InvalidInput`], [`RetrievalError::DimensionMismatch`])
//! are caller bugs and are never retried. [`RetrievalError::EmbeddingUnavailable`]
//! and [`RetrievalError::StoreUnavailable`] are transient: the caller may
//! retry with backoff or degrade to partial results.
//!
//! Deleting or extending an unknown chunk is not an error. Those operations
//! return `false` instead.

use crate::models::StoreOrigin;

/// Result alias for retrieval operations.
pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(
        "lifetime violation: chunk {chunk_id} (is_ephemeral = {is_ephemeral}) rejected by the {store} store"
    )]
    LifetimeViolation {
        chunk_id: String,
        store: StoreOrigin,
        is_ephemeral: bool,
    },

    #[error("embedding provider unavailable: {reason}")]
    EmbeddingUnavailable { reason: String },

    #[error("{store} store unavailable: {reason}")]
    StoreUnavailable { store: StoreOrigin, reason: String },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl RetrievalError {
    /// Whether the failure is worth retrying or degrading around.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RetrievalError::EmbeddingUnavailable { .. } | RetrievalError::StoreUnavailable { .. }
        )
    }

    pub fn embedding(reason: impl Into<String>) -> Self {
        RetrievalError::EmbeddingUnavailable {
            reason: reason.into(),
        }
    }

    pub fn store(store: StoreOrigin, reason: impl Into<String>) -> Self {
        RetrievalError::StoreUnavailable {
            store,
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        RetrievalError::InvalidInput {
            reason: reason.into(),
        }
    }
}
