//! End-to-end tests through [`Vault`]: ingest into both stores, query,
//! expire, reopen.
//!
//! A deterministic bag-of-words embedder stands in for a real model and a
//! [`ManualClock`] drives TTL expiry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docvault::config::Config;
use docvault::ingest::Lifetime;
use docvault::orchestrator::ContextEvent;
use docvault::vault::Vault;
use docvault_core::clock::ManualClock;
use docvault_core::embedding::EmbeddingProvider;
use docvault_core::models::{Document, StoreOrigin};
use docvault_core::RetrievalResult;
use tempfile::TempDir;

const DIMS: usize = 32;

/// Hashes lowercase words into a fixed number of buckets.
struct WordHashEmbedder;

fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % (DIMS as u64 - 1)) as usize + 1
}

#[async_trait]
impl EmbeddingProvider for WordHashEmbedder {
    fn model_name(&self) -> &str {
        "word-hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0; DIMS];
                v[0] = 0.1;
                for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                    v[bucket(&word.to_lowercase())] += 1.0;
                }
                v
            })
            .collect())
    }
}

fn config(db_path: Option<&std::path::Path>) -> Config {
    let durable = match db_path {
        Some(path) => format!("[durable]\ndb_path = {:?}\n", path.display().to_string()),
        None => String::new(),
    };
    Config::from_toml_str(&format!(
        r#"
[chunking]
min_size = 1
max_size = 200
overlap = 0
heading_weight = 0.0

[retrieval]
top_k = 10
timeout_ms = 5000

{durable}
"#
    ))
    .unwrap()
}

async fn open(db_path: Option<&std::path::Path>, clock: &ManualClock) -> Vault {
    Vault::open_with(config(db_path), Arc::new(WordHashEmbedder), Arc::new(clock.clone()))
        .await
        .unwrap()
}

const PLAN: &str = "# Project X\nThe launch is planned for spring.\n## Risks\nSupplier delays could slip the launch.";
const MEMO: &str = "Reminder: the supplier called about delays this morning.";

#[tokio::test]
async fn test_results_come_from_the_matching_store() {
    let clock = ManualClock::new();
    let vault = open(None, &clock).await;

    vault
        .ingest(&Document::new("docs/plan.md", PLAN), Lifetime::Durable)
        .await
        .unwrap();
    vault
        .ingest(
            &Document::new("inbox/memo.txt", MEMO).with_metadata("caller_secret", "hunter2"),
            Lifetime::Ephemeral {
                ttl: Duration::from_secs(60),
            },
        )
        .await
        .unwrap();

    let payload = vault.query("supplier delays").await.unwrap();
    assert!(!payload.partial);
    assert!(payload.results.iter().any(|r| r.store_origin == StoreOrigin::Durable));
    assert!(payload.results.iter().any(|r| r.store_origin == StoreOrigin::Ephemeral));

    for result in &payload.results {
        assert_eq!(result.chunk.is_ephemeral, result.store_origin == StoreOrigin::Ephemeral);
        match result.store_origin {
            StoreOrigin::Durable => assert!(vault.durable().contains(&result.chunk.id)),
            StoreOrigin::Ephemeral => {
                assert!(vault.ephemeral().contains(&result.chunk.id));
                assert!(!result.chunk.metadata.contains_key("caller_secret"));
            }
        }
    }

    let scores: Vec<f32> = payload.results.iter().map(|r| r.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));

    vault.shutdown().await;
}

#[tokio::test]
async fn test_expired_ephemeral_chunks_leave_the_context() {
    let clock = ManualClock::new();
    let vault = open(None, &clock).await;

    vault
        .ingest(
            &Document::new("inbox/memo.txt", MEMO),
            Lifetime::Ephemeral {
                ttl: Duration::from_secs(60),
            },
        )
        .await
        .unwrap();

    let before = vault.query("supplier delays").await.unwrap();
    assert_eq!(before.results.len(), 1);

    clock.advance(Duration::from_secs(61));
    let after = vault.query("supplier delays").await.unwrap();
    assert!(after.results.is_empty());
    assert!(!after.partial);

    vault.shutdown().await;
}

#[tokio::test]
async fn test_durable_chunks_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("data").join("vault.sqlite");
    let clock = ManualClock::new();

    let vault = open(Some(&db_path), &clock).await;
    let report = vault
        .ingest(&Document::new("docs/plan.md", PLAN), Lifetime::Durable)
        .await
        .unwrap();
    assert!(report.stored > 0);
    vault
        .ingest_ephemeral(&Document::new("inbox/memo.txt", MEMO))
        .await
        .unwrap();
    vault.shutdown().await;

    let vault = open(Some(&db_path), &clock).await;
    assert_eq!(vault.durable().len(), report.stored);
    assert!(vault.ephemeral().is_empty());

    let payload = vault.query("launch risks").await.unwrap();
    assert!(!payload.results.is_empty());
    assert!(payload.results.iter().all(|r| r.store_origin == StoreOrigin::Durable));

    let again = vault
        .ingest(&Document::new("docs/plan.md", PLAN), Lifetime::Durable)
        .await
        .unwrap();
    assert_eq!(again.stored, 0);

    vault.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_ephemeral_ingests_are_all_searchable() {
    let clock = ManualClock::new();
    let vault = Arc::new(open(None, &clock).await);
    let n = 24;

    let mut tasks = Vec::new();
    for i in 0..n {
        let vault = Arc::clone(&vault);
        tasks.push(tokio::spawn(async move {
            let doc = Document::new(format!("inbox/{i}.txt"), format!("note number {i} about topic{i}"));
            vault.ingest_ephemeral(&doc).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let payload = vault
        .query_with("note number about", n, Duration::from_secs(5))
        .await
        .unwrap();
    let mut ids: Vec<&str> = payload.results.iter().map(|r| r.chunk.id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), n);
}

#[tokio::test]
async fn test_stream_ends_with_complete_payload() {
    let clock = ManualClock::new();
    let vault = open(None, &clock).await;
    vault
        .ingest(&Document::new("docs/plan.md", PLAN), Lifetime::Durable)
        .await
        .unwrap();

    let mut rx = vault.query_stream("launch").await.unwrap();
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let blocks = events
        .iter()
        .filter(|e| matches!(e, ContextEvent::Block { .. }))
        .count();
    assert_eq!(blocks, 2);
    match events.last() {
        Some(ContextEvent::Complete(payload)) => {
            assert!(!payload.partial);
            assert!(payload.render().contains("durable | Project X"));
        }
        other => panic!("expected Complete, got {other:?}"),
    }

    vault.shutdown().await;
}
