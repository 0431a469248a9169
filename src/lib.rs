//! # docvault
//!
//! A retrieval core that keeps long-lived and short-lived knowledge apart.
//!
//! Documents are split by the heading-aware chunker, embedded in batches,
//! and routed by a caller-supplied lifetime to one of two stores. Queries
//! fan out to both stores concurrently and come back as one ranked,
//! sanitized context payload.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐
//! │ Document │──▶│ Chunker  │──▶│ Embedding │
//! └──────────┘   └──────────┘   └─────┬─────┘
//!                                     │ lifetime
//!                      ┌──────────────┴──────────┐
//!                      ▼                         ▼
//!               ┌─────────────┐          ┌─────────────┐
//!               │   Durable   │          │  Ephemeral  │◀── sweep
//!               │ (SQLite opt)│          │ (TTL+redact)│
//!               └──────┬──────┘          └──────┬──────┘
//!                      └───────────┬────────────┘
//!                                  ▼
//!                          ┌──────────────┐
//!                          │ Orchestrator │──▶ ContextPayload
//!                          └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`embedding`] | OpenAI/Ollama providers and the embedding cache |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Durable store schema |
//! | [`durable`] | Append-only durable store |
//! | [`ephemeral`] | TTL store with background sweep |
//! | [`ingest`] | Chunk, embed, route by lifetime |
//! | [`orchestrator`] | Concurrent query fan-out and merge |
//! | [`vault`] | Wires everything from a [`config::Config`] |
//!
//! Models, the chunker, the vector index and the error type live in
//! [`docvault_core`].

pub use docvault_core;

pub mod config;
pub mod db;
pub mod durable;
pub mod embedding;
pub mod ephemeral;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod vault;
