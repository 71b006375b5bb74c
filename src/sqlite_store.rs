//! SQLite FTS5 search backend.
//!
//! An alternative to the in-memory BM25 engine for deployments that prefer
//! a database file. `agent-nav init-db` imports the JSON catalog with
//! [`import_catalog`]; the server then opens it with [`SqliteSearch::open`].
//!
//! Ranking uses FTS5's `bm25()` with column weights mirroring the in-memory
//! engine (name 3, description 2, labels and tags 1). Unlike the in-memory
//! engine, only documents matching at least one query token are returned.
//! When nothing matches, the same substring fallback applies. Filters run
//! after ranking, then the result is truncated.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use agent_navigator_core::cache::{CacheStats, LruCache};
use agent_navigator_core::filters::SearchFilters;
use agent_navigator_core::models::{AgentRecord, FilterOptions, Vocabulary};
use agent_navigator_core::search::{filter_options_for, haystack, substring_scores, SearchHit};
use agent_navigator_core::store::SearchBackend;
use agent_navigator_core::tokenize::tokenize;

use crate::config::Config;
use crate::db;
use crate::migrate;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    query: String,
    filters: SearchFilters,
    limit: usize,
}

pub struct SqliteSearch {
    pool: SqlitePool,
    records: Vec<AgentRecord>,
    by_id: HashMap<String, usize>,
    haystacks: Vec<String>,
    cache: LruCache<QueryKey, Vec<SearchHit>>,
}

fn labels(r: &AgentRecord) -> String {
    let mut parts: Vec<&str> = vec![r.category.as_str()];
    parts.extend(r.frameworks.iter().map(|f| f.as_str()));
    parts.extend(r.llm_providers.iter().map(|p| p.as_str()));
    parts.push(r.design_pattern.as_str());
    parts.push(r.complexity.as_str());
    parts.join(" ")
}

/// Quoted OR of the query tokens, safe to pass to `MATCH`.
fn match_expression(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Replaces the database contents with `records`. Returns how many were
/// stored; empty and duplicate ids are skipped (first wins).
pub async fn import_catalog(pool: &SqlitePool, records: &[AgentRecord], source: &str) -> Result<usize> {
    migrate::run_migrations(pool).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM agents").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM agents_fts").execute(&mut *tx).await?;

    let mut stored = 0usize;
    for (position, record) in records.iter().enumerate() {
        if record.id.trim().is_empty() {
            continue;
        }
        let json = serde_json::to_string(record)?;
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO agents
                (id, position, name, category, complexity, supports_local_models, record_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(position as i64)
        .bind(&record.name)
        .bind(record.category.as_str())
        .bind(record.complexity.as_str())
        .bind(record.supports_local_models)
        .bind(&json)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tracing::warn!(id = %record.id, "skipping duplicate agent id");
            continue;
        }

        sqlx::query(
            "INSERT INTO agents_fts (agent_id, name, description, labels, tags) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(labels(record))
        .bind(record.tags.join(" "))
        .execute(&mut *tx)
        .await?;
        stored += 1;
    }

    for (key, value) in [
        ("source", source.to_string()),
        ("imported_at", chrono::Utc::now().to_rfc3339()),
        ("agents", stored.to_string()),
    ] {
        sqlx::query(
            "INSERT INTO catalog_meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(stored)
}

/// `agent-nav init-db`: imports the JSON catalog at `from` (or the
/// configured catalog) into the configured SQLite database.
pub async fn run_init_db(config: &Config, from: Option<&Path>) -> Result<()> {
    let source = from.unwrap_or(&config.data.agents_path);
    let records = crate::catalog::load_agents(source)?;
    let pool = db::connect(&config.search.sqlite_path).await?;
    let stored = import_catalog(&pool, &records, &source.display().to_string()).await?;
    pool.close().await;

    println!(
        "Imported {} agents from {} into {}",
        stored,
        source.display(),
        config.search.sqlite_path.display()
    );
    Ok(())
}

impl SqliteSearch {
    pub async fn open(config: &Config) -> Result<Self> {
        let path = &config.search.sqlite_path;
        if !path.exists() {
            bail!(
                "SQLite catalog not found: {}. Run `agent-nav init-db` first.",
                path.display()
            );
        }
        let pool = db::connect(path).await?;
        Self::from_pool(pool, config.search.cache_size).await
    }

    pub async fn from_pool(pool: SqlitePool, cache_size: usize) -> Result<Self> {
        if !migrate::schema_exists(&pool).await? {
            bail!("SQLite catalog has no agents table. Run `agent-nav init-db` first.");
        }

        let rows = sqlx::query("SELECT id, record_json FROM agents ORDER BY position")
            .fetch_all(&pool)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let json: String = row.get("record_json");
            let record: AgentRecord = serde_json::from_str(&json)
                .with_context(|| format!("Corrupt record in SQLite catalog: {}", id))?;
            records.push(record);
        }

        let by_id = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        let haystacks = records.iter().map(haystack).collect();
        tracing::info!(agents = records.len(), "opened SQLite catalog");

        Ok(Self {
            pool,
            records,
            by_id,
            haystacks,
            cache: LruCache::new(cache_size),
        })
    }

    async fn rank(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(self
                .records
                .iter()
                .filter(|r| filters.matches(r))
                .take(limit)
                .map(|r| SearchHit {
                    record: r.clone(),
                    score: None,
                })
                .collect());
        }

        let rows = sqlx::query(
            r#"
            SELECT agent_id, bm25(agents_fts, 0.0, 3.0, 2.0, 1.0, 1.0) AS rank
            FROM agents_fts
            WHERE agents_fts MATCH ?
            ORDER BY rank
            "#,
        )
        .bind(match_expression(&tokens))
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(usize, f64)> = rows
            .iter()
            .filter_map(|row| {
                let id: String = row.get("agent_id");
                let rank: f64 = row.get("rank");
                // negate so higher = better
                self.by_id.get(&id).map(|&i| (i, -rank))
            })
            .collect();

        if !scored.iter().any(|(_, s)| *s > 0.0) {
            scored = substring_scores(&self.haystacks, &tokens);
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        Ok(scored
            .into_iter()
            .filter(|(i, _)| filters.matches(&self.records[*i]))
            .take(limit)
            .map(|(i, score)| SearchHit {
                record: self.records[i].clone(),
                score: Some(score),
            })
            .collect())
    }
}

#[async_trait]
impl SearchBackend for SqliteSearch {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let key = QueryKey {
            query: query.trim().to_lowercase(),
            filters: filters.clone().normalized(),
            limit,
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let results = self.rank(&key.query, &key.filters, limit).await?;
        self.cache.insert(key, results.clone());
        Ok(results)
    }

    async fn get(&self, id: &str) -> Result<Option<AgentRecord>> {
        let row = sqlx::query("SELECT record_json FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.get("record_json");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn filter_options(&self) -> Result<FilterOptions> {
        Ok(filter_options_for(&self.records))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
