//! # docvault core
//!
//! Shared, runtime-free logic for docvault: data models, the hybrid
//! heading-aware chunker, the embedding provider trait, the brute-force
//! vector index, the monotonic clock abstraction, and the allow-listed
//! metadata used at the ephemeral boundary.
//!
//! This crate contains no tokio, sqlx, or network dependencies. Stores,
//! background expiration, and the retrieval orchestrator live in the
//! `docvault` crate.

pub mod chunk;
pub mod clock;
pub mod embedding;
pub mod error;
pub mod index;
pub mod metadata;
pub mod models;
pub mod store;

pub use error::{RetrievalError, RetrievalResult};
