//! Read-side abstraction over the two stores.
//!
//! The orchestrator only needs to search, so it sees each store as a
//! [`RetrievalSource`]. Writes go through the concrete store types, whose
//! lifetime checks differ.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RetrievalResult;
use crate::models::{SearchResult, StoreOrigin};

/// A searchable store.
///
/// Implementations must be `Send + Sync`; the orchestrator queries several
/// sources concurrently from spawned tasks.
#[async_trait]
pub trait RetrievalSource: Send + Sync {
    /// Which store results are attributed to.
    fn origin(&self) -> StoreOrigin;

    /// Up to `k` results ordered by descending similarity.
    ///
    /// Takes owned handles so implementations can move the search onto a
    /// blocking thread.
    async fn retrieve(self: Arc<Self>, query: Arc<[f32]>, k: usize) -> RetrievalResult<Vec<SearchResult>>;
}
