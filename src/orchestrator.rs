//! Query-time fan-out across the durable and ephemeral stores.
//!
//! A query is embedded once, then every [`RetrievalSource`] is searched in
//! its own tokio task against a single deadline. Sources that fail or miss
//! the deadline are recorded as [`StoreFailure`]s and the payload is flagged
//! `partial`; a query never fails because one store is down. Timed-out
//! searches are abandoned rather than aborted: they run to completion in
//! the background and their results are discarded.
//!
//! # Merge
//!
//! Results from all sources are concatenated and sorted by descending
//! score, then truncated to `top_k`. On exactly equal scores durable hits
//! come before ephemeral ones, then ids ascend.
//!
//! Stores rank synchronously; [`search_blocking`] moves that work onto
//! tokio's blocking pool so a large index never stalls the runtime.
//!
//! Chunks arrive already sanitized (the ephemeral store redacts metadata on
//! write), so no filtering happens here.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use docvault_core::embedding::{embed_query, EmbeddingProvider};
use docvault_core::error::{RetrievalError, RetrievalResult};
use docvault_core::models::{SearchResult, StoreOrigin};
use docvault_core::store::RetrievalSource;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// A store that did not contribute to a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreFailure {
    pub origin: StoreOrigin,
    pub reason: String,
}

/// The ranked context handed to the generator.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPayload {
    pub query_id: String,
    pub query: String,
    pub results: Vec<SearchResult>,
    /// At least one store failed or timed out.
    pub partial: bool,
    pub failures: Vec<StoreFailure>,
}

impl ContextPayload {
    fn new(query: &str, results: Vec<SearchResult>, failures: Vec<StoreFailure>) -> Self {
        Self {
            query_id: uuid::Uuid::new_v4().to_string(),
            query: query.to_string(),
            results,
            partial: !failures.is_empty(),
            failures,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Numbered plain-text context block.
    ///
    /// ```text
    /// [1] durable | Project X > Risks
    /// Supplier delays ...
    ///
    /// [2] ephemeral | (root)
    /// ...
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, result) in self.results.iter().enumerate() {
            let label = result.chunk.heading_label();
            let label = if label.is_empty() { "(root)" } else { label.as_str() };
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}] {} | {}", i + 1, result.store_origin, label);
            let _ = writeln!(out, "{}", result.chunk.content.trim_end());
        }
        out
    }
}

/// Incremental output of [`RetrievalOrchestrator::process_query_stream`].
#[derive(Debug, Clone)]
pub enum ContextEvent {
    /// One store answered.
    Block {
        origin: StoreOrigin,
        results: Vec<SearchResult>,
    },
    /// One store failed or missed the deadline.
    StoreFailed(StoreFailure),
    /// Final merged payload. Always the last event.
    Complete(ContextPayload),
}

type SourceOutcome = (usize, StoreOrigin, RetrievalResult<Vec<SearchResult>>);

pub struct RetrievalOrchestrator {
    provider: Arc<dyn EmbeddingProvider>,
    sources: Vec<Arc<dyn RetrievalSource>>,
}

impl RetrievalOrchestrator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, sources: Vec<Arc<dyn RetrievalSource>>) -> Self {
        Self { provider, sources }
    }

    /// Embed `query`, search every source, and merge.
    ///
    /// Fails only when the query is blank or the embedding provider is
    /// unavailable. Store failures produce a `partial` payload.
    pub async fn process_query(&self, query: &str, top_k: usize, timeout: Duration) -> RetrievalResult<ContextPayload> {
        let Some(vector) = self.prepare(query, top_k).await? else {
            return Ok(ContextPayload::new(query, Vec::new(), Vec::new()));
        };
        let started = Instant::now();
        let deadline = started.checked_add(timeout);

        let (rx, pending) = self.fan_out(vector, top_k);
        let (results, failures) = gather(rx, pending, deadline, timeout, None).await;

        let payload = ContextPayload::new(query, merge(results, top_k), failures);
        log_payload(&payload, started);
        Ok(payload)
    }

    /// Like [`process_query`](Self::process_query), but emits each store's
    /// block as soon as it arrives, followed by the merged payload.
    pub async fn process_query_stream(
        &self,
        query: &str,
        top_k: usize,
        timeout: Duration,
    ) -> RetrievalResult<mpsc::Receiver<ContextEvent>> {
        let (events, receiver) = mpsc::channel(self.sources.len() * 2 + 1);

        let Some(vector) = self.prepare(query, top_k).await? else {
            let _ = events
                .send(ContextEvent::Complete(ContextPayload::new(query, Vec::new(), Vec::new())))
                .await;
            return Ok(receiver);
        };
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let (rx, pending) = self.fan_out(vector, top_k);
        let query = query.to_string();

        tokio::spawn(async move {
            let (results, failures) = gather(rx, pending, deadline, timeout, Some(&events)).await;
            let payload = ContextPayload::new(&query, merge(results, top_k), failures);
            log_payload(&payload, started);
            let _ = events.send(ContextEvent::Complete(payload)).await;
        });

        Ok(receiver)
    }

    /// Validate and embed. `None` means there is nothing to search for.
    async fn prepare(&self, query: &str, top_k: usize) -> RetrievalResult<Option<Arc<[f32]>>> {
        if query.trim().is_empty() {
            return Err(RetrievalError::invalid("query is empty"));
        }
        if top_k == 0 || self.sources.is_empty() {
            return Ok(None);
        }
        let vector = embed_query(self.provider.as_ref(), query).await?;
        Ok(Some(Arc::from(vector)))
    }

    fn fan_out(&self, vector: Arc<[f32]>, k: usize) -> (mpsc::Receiver<SourceOutcome>, BTreeMap<usize, StoreOrigin>) {
        let (tx, rx) = mpsc::channel(self.sources.len());
        let mut pending = BTreeMap::new();

        for (slot, source) in self.sources.iter().enumerate() {
            let origin = source.origin();
            pending.insert(slot, origin);
            let source = Arc::clone(source);
            let vector = Arc::clone(&vector);
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = source.retrieve(vector, k).await;
                let _ = tx.send((slot, origin, outcome)).await;
            });
        }

        (rx, pending)
    }
}

/// Run a synchronous store search on the blocking pool.
pub async fn search_blocking<F>(origin: StoreOrigin, search: F) -> RetrievalResult<Vec<SearchResult>>
where
    F: FnOnce() -> RetrievalResult<Vec<SearchResult>> + Send + 'static,
{
    tokio::task::spawn_blocking(search)
        .await
        .map_err(|e| RetrievalError::store(origin, format!("search task failed: {e}")))?
}

/// Next outcome, or `None` once `deadline` passes. No deadline means the
/// timeout is too large to represent and is treated as unbounded.
async fn recv_until(rx: &mut mpsc::Receiver<SourceOutcome>, deadline: Option<Instant>) -> Option<Option<SourceOutcome>> {
    match deadline {
        Some(deadline) => timeout_at(deadline, rx.recv()).await.ok(),
        None => Some(rx.recv().await),
    }
}

/// Wait for every pending source or the deadline, whichever comes first.
async fn gather(
    mut rx: mpsc::Receiver<SourceOutcome>,
    mut pending: BTreeMap<usize, StoreOrigin>,
    deadline: Option<Instant>,
    timeout: Duration,
    events: Option<&mpsc::Sender<ContextEvent>>,
) -> (Vec<SearchResult>, Vec<StoreFailure>) {
    let mut results = Vec::new();
    let mut failures = Vec::new();

    while !pending.is_empty() {
        let event = match recv_until(&mut rx, deadline).await {
            Some(Some((slot, origin, outcome))) => {
                pending.remove(&slot);
                match outcome {
                    Ok(hits) => {
                        results.extend(hits.iter().cloned());
                        ContextEvent::Block { origin, results: hits }
                    }
                    Err(e) => {
                        tracing::warn!(store = %origin, error = %e, "store search failed");
                        let failure = StoreFailure {
                            origin,
                            reason: e.to_string(),
                        };
                        failures.push(failure.clone());
                        ContextEvent::StoreFailed(failure)
                    }
                }
            }
            // Every sender is gone: the remaining tasks panicked.
            Some(None) => {
                fail_remaining(&mut pending, &mut failures, events, "search task exited without a result").await;
                break;
            }
            None => {
                let reason = format!("timed out after {} ms", timeout.as_millis());
                fail_remaining(&mut pending, &mut failures, events, &reason).await;
                break;
            }
        };
        if let Some(events) = events {
            let _ = events.send(event).await;
        }
    }

    (results, failures)
}

async fn fail_remaining(
    pending: &mut BTreeMap<usize, StoreOrigin>,
    failures: &mut Vec<StoreFailure>,
    events: Option<&mpsc::Sender<ContextEvent>>,
    reason: &str,
) {
    for (_, origin) in std::mem::take(pending) {
        tracing::warn!(store = %origin, reason, "store left out of query");
        let failure = StoreFailure {
            origin,
            reason: reason.to_string(),
        };
        if let Some(events) = events {
            let _ = events.send(ContextEvent::StoreFailed(failure.clone())).await;
        }
        failures.push(failure);
    }
}

fn origin_rank(origin: StoreOrigin) -> u8 {
    match origin {
        StoreOrigin::Durable => 0,
        StoreOrigin::Ephemeral => 1,
    }
}

/// Score desc, durable before ephemeral on ties, then id asc.
pub fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| origin_rank(a.store_origin).cmp(&origin_rank(b.store_origin)))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

pub fn merge(mut results: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    results.sort_by(compare_results);
    results.truncate(top_k);
    results
}

fn log_payload(payload: &ContextPayload, started: Instant) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if payload.partial {
        tracing::warn!(
            query_id = %payload.query_id,
            results = payload.results.len(),
            failed = payload.failures.len(),
            elapsed_ms,
            "partial context"
        );
    } else {
        tracing::info!(
            query_id = %payload.query_id,
            results = payload.results.len(),
            elapsed_ms,
            "context assembled"
        );
    }
}
