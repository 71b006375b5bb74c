//! In-memory [`SearchBackend`] backed by [`AgentSearch`].
//!
//! Every call is synchronous underneath and returns an immediately-ready
//! future.

use anyhow::Result;
use async_trait::async_trait;

use crate::cache::CacheStats;
use crate::filters::SearchFilters;
use crate::models::{AgentRecord, FilterOptions};
use crate::search::{AgentSearch, SearchHit};

use super::SearchBackend;

#[async_trait]
impl SearchBackend for AgentSearch {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        Ok(AgentSearch::search(self, query, filters, limit))
    }

    async fn get(&self, id: &str) -> Result<Option<AgentRecord>> {
        Ok(AgentSearch::get(self, id).cloned())
    }

    async fn filter_options(&self) -> Result<FilterOptions> {
        Ok(AgentSearch::filter_options(self))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len())
    }

    fn cache_stats(&self) -> CacheStats {
        AgentSearch::cache_stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use std::sync::Arc;

    #[tokio::test]
    async fn trait_object_delegates_to_engine() {
        let mut rag = AgentRecord::new("rag_bot", "RAG Bot");
        rag.category = Category::Rag;
        let backend: Arc<dyn SearchBackend> = Arc::new(AgentSearch::build(vec![
            rag,
            AgentRecord::new("plain", "Plain Tool"),
        ]));

        assert_eq!(backend.name(), "memory");
        assert_eq!(backend.count().await.unwrap(), 2);
        assert_eq!(
            backend.get("rag_bot").await.unwrap().unwrap().name,
            "RAG Bot"
        );
        assert!(backend.get("nope").await.unwrap().is_none());

        let hits = backend
            .search("", &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(
            backend.filter_options().await.unwrap().categories,
            vec!["other", "rag"]
        );
        assert_eq!(backend.cache_stats().misses, 1);
    }
}
