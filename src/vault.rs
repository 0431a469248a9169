//! Top-level handle wiring every component from a [`Config`].
//!
//! ```rust,no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use docvault::config::load_config;
//! use docvault::ingest::Lifetime;
//! use docvault::vault::Vault;
//! use docvault_core::models::Document;
//!
//! let config = load_config(std::path::Path::new("docvault.toml"))?;
//! let vault = Vault::open(config).await?;
//! vault
//!     .ingest(&Document::new("notes/plan.md", "# Plan\nShip it."), Lifetime::Durable)
//!     .await?;
//! let context = vault.query("what is the plan?").await?;
//! println!("{}", context.render());
//! vault.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use docvault_core::clock::{Clock, MonotonicClock};
use docvault_core::embedding::EmbeddingProvider;
use docvault_core::error::RetrievalResult;
use docvault_core::models::Document;
use docvault_core::store::RetrievalSource;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::db;
use crate::durable::DurableStore;
use crate::embedding::create_provider;
use crate::ephemeral::{EphemeralStore, SweepHandle};
use crate::ingest::{IngestReport, Ingestor, Lifetime};
use crate::orchestrator::{ContextEvent, ContextPayload, RetrievalOrchestrator};

pub struct Vault {
    config: Config,
    durable: Arc<DurableStore>,
    ephemeral: Arc<EphemeralStore>,
    ingestor: Ingestor,
    orchestrator: RetrievalOrchestrator,
    sweep: SweepHandle,
    pool: Option<SqlitePool>,
}

impl Vault {
    /// Build the provider named in the config and open the vault.
    pub async fn open(config: Config) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;
        Self::open_with(config, provider, Arc::new(MonotonicClock)).await
    }

    /// Open with an explicit provider and clock.
    pub async fn open_with(config: Config, provider: Arc<dyn EmbeddingProvider>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let pool = match &config.durable.db_path {
            Some(path) => Some(db::connect(path).await?),
            None => None,
        };
        let durable = Arc::new(match &pool {
            Some(pool) => DurableStore::open(pool.clone()).await?,
            None => DurableStore::in_memory(),
        });

        let (ephemeral, sweep) = EphemeralStore::spawn(clock, config.ephemeral.sweep_interval())
            .context("Failed to start ephemeral sweep")?;

        let ingestor = Ingestor::new(
            config.chunking.to_core(),
            config.embedding.batch_size,
            Arc::clone(&provider),
            Arc::clone(&durable),
            Arc::clone(&ephemeral),
        )?;

        let sources: Vec<Arc<dyn RetrievalSource>> = vec![durable.clone(), ephemeral.clone()];
        let orchestrator = RetrievalOrchestrator::new(provider, sources);

        tracing::info!(
            durable_chunks = durable.len(),
            persistent = pool.is_some(),
            sweep_secs = config.ephemeral.sweep_interval_secs,
            "vault opened"
        );

        Ok(Self {
            config,
            durable,
            ephemeral,
            ingestor,
            orchestrator,
            sweep,
            pool,
        })
    }

    pub async fn ingest(&self, document: &Document, lifetime: Lifetime) -> RetrievalResult<IngestReport> {
        self.ingestor.ingest(document, lifetime).await
    }

    /// Ingest with the configured default TTL.
    pub async fn ingest_ephemeral(&self, document: &Document) -> RetrievalResult<IngestReport> {
        let ttl = self.config.ephemeral.default_ttl();
        self.ingestor.ingest(document, Lifetime::Ephemeral { ttl }).await
    }

    /// Query with the configured `top_k` and timeout.
    pub async fn query(&self, text: &str) -> RetrievalResult<ContextPayload> {
        self.query_with(text, self.config.retrieval.top_k, self.config.retrieval.timeout())
            .await
    }

    pub async fn query_with(&self, text: &str, top_k: usize, timeout: Duration) -> RetrievalResult<ContextPayload> {
        self.orchestrator.process_query(text, top_k, timeout).await
    }

    pub async fn query_stream(&self, text: &str) -> RetrievalResult<mpsc::Receiver<ContextEvent>> {
        self.orchestrator
            .process_query_stream(text, self.config.retrieval.top_k, self.config.retrieval.timeout())
            .await
    }

    pub fn durable(&self) -> &Arc<DurableStore> {
        &self.durable
    }

    pub fn ephemeral(&self) -> &Arc<EphemeralStore> {
        &self.ephemeral
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the sweep task and close the database.
    pub async fn shutdown(self) {
        self.sweep.shutdown().await;
        if let Some(pool) = self.pool {
            pool.close().await;
        }
        tracing::info!("vault closed");
    }
}
