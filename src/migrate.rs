//! Idempotent schema setup for the durable store.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Ephemeral rows are refused by the schema itself, not only by the store.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS durable_chunks (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            heading_path_json TEXT NOT NULL DEFAULT '[]',
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            is_ephemeral INTEGER NOT NULL DEFAULT 0 CHECK (is_ephemeral = 0),
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_durable_chunks_created_at ON durable_chunks(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("data/vault.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='durable_chunks'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_schema_refuses_ephemeral_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("vault.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let result = sqlx::query(
            "INSERT INTO durable_chunks (id, content, start_offset, end_offset, is_ephemeral, embedding, dims, created_at)
             VALUES ('x', 'y', 0, 1, 1, x'00000000', 1, 0)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
        pool.close().await;
    }
}
