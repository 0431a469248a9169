//! Ephemeral store: time-bounded chunks with redacted metadata.
//!
//! Every entry moves through `Active -> Expired -> Purged`. An entry is
//! Active while its registry deadline lies in the future, Expired once the
//! deadline passes or it is deleted, and Purged once it is gone from both
//! the index and the registry. Only Active entries are ever returned.
//!
//! The [`VectorIndex`] and the TTL registry live behind one mutex, so the
//! sweep, `add`, `delete` and the bookkeeping half of `search` all observe
//! the two maps in agreement. Scoring runs outside the lock and is followed
//! by a second expiry check before results are assembled.
//!
//! Metadata is reduced to the allow-listed keys on the way in. Ephemeral
//! data is never written to disk by this module; [`EphemeralStore::snapshot`]
//! and [`EphemeralStore::restore`] exist for in-process recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use docvault_core::clock::Clock;
use docvault_core::error::{RetrievalError, RetrievalResult};
use docvault_core::index::{rank, ScoredChunk, VectorIndex};
use docvault_core::metadata::sanitize;
use docvault_core::models::{EmbeddedChunk, SearchResult, StoreOrigin};
use docvault_core::store::RetrievalSource;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::search_blocking;

/// Longest gap between background sweeps.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default)]
struct EphemeralState {
    index: VectorIndex,
    /// chunk id -> deadline
    registry: HashMap<String, Instant>,
}

impl EphemeralState {
    fn is_active(&self, id: &str, now: Instant) -> bool {
        self.registry.get(id).is_some_and(|deadline| *deadline > now)
    }

    fn purge(&mut self, id: &str) {
        self.index.remove(id);
        self.registry.remove(id);
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .registry
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.purge(id);
        }
        expired.len()
    }
}

/// In-memory copy of the store's index and registry.
#[derive(Debug, Clone, Default)]
pub struct EphemeralSnapshot {
    pub chunks: Vec<EmbeddedChunk>,
    pub registry: HashMap<String, Instant>,
}

/// What [`EphemeralStore::restore`] kept and what it dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub restored: usize,
    pub expired: usize,
    /// Index entries with no registry record.
    pub orphaned_chunks: usize,
    /// Registry records with no index entry.
    pub orphaned_registry: usize,
    /// Entries not flagged ephemeral or whose vectors did not fit the index.
    pub rejected: usize,
}

impl RecoveryReport {
    pub fn dropped(&self) -> usize {
        self.expired + self.orphaned_chunks + self.orphaned_registry + self.rejected
    }
}

pub struct EphemeralStore {
    state: Mutex<EphemeralState>,
    clock: Arc<dyn Clock>,
}

impl EphemeralStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(EphemeralState::default()),
            clock,
        }
    }

    /// Create a store and start its background sweep.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(clock: Arc<dyn Clock>, sweep_interval: Duration) -> RetrievalResult<(Arc<Self>, SweepHandle)> {
        let store = Arc::new(Self::new(clock));
        let handle = store.start_sweep(sweep_interval)?;
        Ok((store, handle))
    }

    /// Rebuild a store from a snapshot, keeping only entries that are
    /// present in both the index and the registry and not yet expired.
    pub fn restore(snapshot: EphemeralSnapshot, clock: Arc<dyn Clock>) -> (Self, RecoveryReport) {
        let now = clock.now();
        let EphemeralSnapshot { chunks, mut registry } = snapshot;
        let mut state = EphemeralState::default();
        let mut report = RecoveryReport::default();

        for embedded in chunks {
            let Some(deadline) = registry.remove(embedded.id()) else {
                report.orphaned_chunks += 1;
                continue;
            };
            if !embedded.is_ephemeral() {
                report.rejected += 1;
                continue;
            }
            if deadline <= now {
                report.expired += 1;
                continue;
            }
            let embedded = redact(embedded);
            let id = embedded.id().to_string();
            match state.index.insert(Arc::new(embedded)) {
                Ok(_) => {
                    state.registry.insert(id, deadline);
                    report.restored += 1;
                }
                Err(e) => {
                    tracing::warn!(chunk_id = %id, error = %e, "dropping ephemeral chunk on restore");
                    report.rejected += 1;
                }
            }
        }
        report.orphaned_registry = registry.len();

        if report.dropped() > 0 {
            tracing::warn!(
                restored = report.restored,
                expired = report.expired,
                orphaned_chunks = report.orphaned_chunks,
                orphaned_registry = report.orphaned_registry,
                rejected = report.rejected,
                "ephemeral store recovered with data loss"
            );
        } else {
            tracing::info!(restored = report.restored, "ephemeral store recovered");
        }

        let store = Self {
            state: Mutex::new(state),
            clock,
        };
        (store, report)
    }

    /// Start the periodic sweep for this store.
    ///
    /// The task holds only a weak reference, so it ends on its own once the
    /// store is dropped.
    pub fn start_sweep(self: &Arc<Self>, every: Duration) -> RetrievalResult<SweepHandle> {
        if every.is_zero() {
            return Err(RetrievalError::invalid("sweep interval must be > 0"));
        }
        if every > MAX_SWEEP_INTERVAL {
            tracing::warn!(
                requested_secs = every.as_secs(),
                max_secs = MAX_SWEEP_INTERVAL.as_secs(),
                "sweep interval clamped"
            );
        }
        let every = every.min(MAX_SWEEP_INTERVAL);
        let (stop, mut stopped) = watch::channel(false);
        let store: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else { break };
                        match store.sweep_now() {
                            Ok(0) => {}
                            Ok(purged) => tracing::debug!(purged, "ephemeral sweep"),
                            Err(e) => tracing::warn!(error = %e, "ephemeral sweep failed"),
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("ephemeral sweep stopped");
        });

        Ok(SweepHandle {
            stop,
            task: Some(task),
        })
    }

    /// Add chunks that stay retrievable for `ttl`.
    ///
    /// The batch is validated as a whole before anything is written.
    /// Re-adding an id replaces the stored entry and resets its deadline.
    pub fn add(&self, chunks: Vec<EmbeddedChunk>, ttl: Duration) -> RetrievalResult<usize> {
        if ttl.is_zero() {
            return Err(RetrievalError::invalid("ttl must be > 0"));
        }
        if let Some(bad) = chunks.iter().find(|c| !c.is_ephemeral()) {
            tracing::error!(chunk_id = %bad.id(), store = %StoreOrigin::Ephemeral, "lifetime violation");
            return Err(RetrievalError::LifetimeViolation {
                chunk_id: bad.id().to_string(),
                store: StoreOrigin::Ephemeral,
                is_ephemeral: false,
            });
        }

        let chunks: Vec<Arc<EmbeddedChunk>> = chunks.into_iter().map(|c| Arc::new(redact(c))).collect();

        let mut state = self.lock()?;
        let mut expected = state.index.dims();
        for chunk in &chunks {
            state.index.check_dims(chunk.embedding())?;
            let actual = chunk.embedding().len();
            let dims = *expected.get_or_insert(actual);
            if dims != actual {
                return Err(RetrievalError::DimensionMismatch { expected: dims, actual });
            }
        }

        let deadline = self
            .clock
            .now()
            .checked_add(ttl)
            .ok_or_else(|| RetrievalError::invalid("ttl is too large"))?;

        let added = chunks.len();
        for chunk in chunks {
            let id = chunk.id().to_string();
            state.index.insert(chunk)?;
            state.registry.insert(id, deadline);
        }
        tracing::debug!(added, ttl_secs = ttl.as_secs_f64(), "ephemeral chunks added");
        Ok(added)
    }

    /// Top-`k` Active chunks by ascending cosine distance.
    pub fn search(&self, query: &[f32], k: usize) -> RetrievalResult<Vec<SearchResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.active_candidates(query)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let ranked = rank(query, &candidates);
        self.confirm_active(ranked, k)
    }

    /// Phase one: every chunk that is Active right now.
    fn active_candidates(&self, query: &[f32]) -> RetrievalResult<Vec<Arc<EmbeddedChunk>>> {
        let state = self.lock()?;
        if state.index.dims().is_none() {
            return Ok(Vec::new());
        }
        state.index.check_dims(query)?;
        let now = self.clock.now();
        Ok(state
            .index
            .iter()
            .filter(|chunk| state.is_active(chunk.id(), now))
            .cloned()
            .collect())
    }

    /// Phase two: drop hits that expired, were deleted, or were replaced
    /// while scoring ran, then truncate.
    fn confirm_active(&self, ranked: Vec<ScoredChunk>, k: usize) -> RetrievalResult<Vec<SearchResult>> {
        let state = self.lock()?;
        let now = self.clock.now();
        let scored = ranked.len();
        let results: Vec<SearchResult> = ranked
            .into_iter()
            .filter(|hit| {
                let id = hit.chunk.id();
                state.is_active(id, now)
                    && state
                        .index
                        .get(id)
                        .is_some_and(|current| Arc::ptr_eq(current, &hit.chunk))
            })
            .take(k)
            .map(|hit| SearchResult {
                chunk: hit.chunk.chunk().clone(),
                score: hit.score,
                store_origin: StoreOrigin::Ephemeral,
            })
            .collect();
        if results.len() < scored.min(k) {
            tracing::trace!(scored, kept = results.len(), "hits expired during search");
        }
        Ok(results)
    }

    /// Purge a chunk. Returns `false` if it was unknown or already expired.
    pub fn delete(&self, chunk_id: &str) -> RetrievalResult<bool> {
        let mut state = self.lock()?;
        let was_active = state.is_active(chunk_id, self.clock.now());
        state.purge(chunk_id);
        Ok(was_active)
    }

    /// Push an Active chunk's deadline back by `additional`.
    ///
    /// Returns `false` if the chunk is unknown or already expired; an
    /// expired chunk is never revived.
    pub fn extend_ttl(&self, chunk_id: &str, additional: Duration) -> RetrievalResult<bool> {
        let mut state = self.lock()?;
        let now = self.clock.now();
        if !state.is_active(chunk_id, now) {
            if state.registry.contains_key(chunk_id) {
                state.purge(chunk_id);
            }
            return Ok(false);
        }
        if let Some(deadline) = state.registry.get_mut(chunk_id) {
            *deadline = deadline
                .checked_add(additional)
                .ok_or_else(|| RetrievalError::invalid("ttl is too large"))?;
        }
        Ok(true)
    }

    /// Time left before an Active chunk expires.
    pub fn expires_in(&self, chunk_id: &str) -> Option<Duration> {
        let state = self.lock().ok()?;
        let now = self.clock.now();
        state
            .registry
            .get(chunk_id)
            .filter(|deadline| **deadline > now)
            .map(|deadline| deadline.duration_since(now))
    }

    /// Purge every expired entry now. Returns how many were purged.
    pub fn sweep_now(&self) -> RetrievalResult<usize> {
        let mut state = self.lock()?;
        Ok(state.purge_expired(self.clock.now()))
    }

    /// Whether the chunk is Active.
    pub fn contains(&self, chunk_id: &str) -> bool {
        self.lock()
            .map(|state| state.is_active(chunk_id, self.clock.now()))
            .unwrap_or(false)
    }

    /// Number of Active chunks.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|state| {
                let now = self.clock.now();
                state.registry.values().filter(|deadline| **deadline > now).count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries still held in memory, including expired ones awaiting a sweep.
    pub fn resident_len(&self) -> usize {
        self.lock().map(|state| state.index.len()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> RetrievalResult<EphemeralSnapshot> {
        let state = self.lock()?;
        Ok(EphemeralSnapshot {
            chunks: state.index.iter().map(|c| EmbeddedChunk::clone(c)).collect(),
            registry: state.registry.clone(),
        })
    }

    fn lock(&self) -> RetrievalResult<MutexGuard<'_, EphemeralState>> {
        self.state
            .lock()
            .map_err(|_| RetrievalError::store(StoreOrigin::Ephemeral, "state lock poisoned"))
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let state = self.lock().unwrap();
        assert_eq!(state.index.len(), state.registry.len());
        for id in state.index.ids() {
            assert!(state.registry.contains_key(id), "index entry {id} has no registry record");
        }
        for chunk in state.index.iter() {
            assert!(chunk.is_ephemeral());
        }
    }
}

#[async_trait]
impl RetrievalSource for EphemeralStore {
    fn origin(&self) -> StoreOrigin {
        StoreOrigin::Ephemeral
    }

    async fn retrieve(self: Arc<Self>, query: Arc<[f32]>, k: usize) -> RetrievalResult<Vec<SearchResult>> {
        search_blocking(StoreOrigin::Ephemeral, move || self.search(&query, k)).await
    }
}

/// Owns the background sweep task.
///
/// [`SweepHandle::shutdown`] stops the loop and waits for it; dropping the
/// handle aborts the task.
pub struct SweepHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "ephemeral sweep task panicked");
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn redact(embedded: EmbeddedChunk) -> EmbeddedChunk {
    let (mut chunk, embedding) = embedded.into_parts();
    chunk.metadata = sanitize(&chunk.metadata);
    EmbeddedChunk::new(chunk, embedding)
}
