//! Schema for the optional SQLite FTS5 search backend.
//!
//! `agents` holds each record as JSON plus a few filter columns, keyed by
//! id and ordered by `position` (catalog order). `agents_fts` indexes the
//! searchable text; its column order matters for the bm25 weights used in
//! [`crate::sqlite_store`].

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            complexity TEXT NOT NULL,
            supports_local_models INTEGER NOT NULL DEFAULT 0,
            record_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='agents_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE agents_fts USING fts5(
                agent_id UNINDEXED,
                name,
                description,
                labels,
                tags
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_position ON agents(position)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_category ON agents(category)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Whether the schema has been created in this database.
pub async fn schema_exists(pool: &SqlitePool) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) = 2 FROM sqlite_master WHERE type='table' AND name IN ('agents', 'agents_fts')",
    )
    .fetch_one(pool)
    .await?;
    Ok(exists)
}
