//! Search backend abstraction.
//!
//! The [`SearchBackend`] trait is what the HTTP layer and the CLI talk to.
//! Two implementations exist: the in-memory BM25 engine in this crate
//! ([`AgentSearch`](crate::search::AgentSearch)) and a SQLite FTS5 backend in
//! the application crate. Both load the corpus once and are read-only
//! afterwards.
//!
//! Implementations must be `Send + Sync` to be shared across request tasks.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::cache::CacheStats;
use crate::filters::SearchFilters;
use crate::models::{AgentRecord, FilterOptions};
use crate::search::SearchHit;

/// Read-only query surface over a loaded catalog.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`search`](SearchBackend::search) | Ranked, filtered, truncated results |
/// | [`get`](SearchBackend::get) | One record by id |
/// | [`filter_options`](SearchBackend::filter_options) | Distinct values per filter |
/// | [`count`](SearchBackend::count) | Corpus size |
/// | [`cache_stats`](SearchBackend::cache_stats) | Result-cache counters |
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short backend name for logs and the health endpoint.
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    async fn get(&self, id: &str) -> Result<Option<AgentRecord>>;

    async fn filter_options(&self) -> Result<FilterOptions>;

    async fn count(&self) -> Result<usize>;

    fn cache_stats(&self) -> CacheStats;
}
