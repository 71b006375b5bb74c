//! Keyword search over the agent catalog.
//!
//! [`AgentSearch`] owns the corpus, a [`Bm25`] model built over it and an
//! [`LruCache`] of recent results. It never fails: unknown filter values
//! match nothing and an unmatched query yields an empty list.
//!
//! # Ranking
//!
//! 1. An empty query (or one that tokenizes to nothing) returns the filtered
//!    corpus in insertion order.
//! 2. Otherwise every document is scored with BM25. Document text weights the
//!    name three times and the description twice.
//! 3. If no document scores above zero, fall back to substring containment:
//!    a document scores the number of query tokens found anywhere in its
//!    lowercased text. Documents scoring zero are dropped.
//! 4. Sort by score descending; ties keep insertion order.
//! 5. Apply filters, then truncate to `limit`.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::bm25::Bm25;
use crate::cache::{CacheStats, LruCache};
use crate::filters::SearchFilters;
use crate::models::{AgentRecord, FilterOptions, Vocabulary};
use crate::tokenize::tokenize;

pub const DEFAULT_CACHE_CAPACITY: usize = 500;

/// A ranked result. `score` is absent for unranked (empty-query) listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: AgentRecord,
    #[serde(rename = "_score", skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    query: String,
    filters: SearchFilters,
    limit: usize,
}

pub struct AgentSearch {
    records: Vec<AgentRecord>,
    by_id: HashMap<String, usize>,
    haystacks: Vec<String>,
    bm25: Bm25,
    cache: LruCache<QueryKey, Vec<SearchHit>>,
}

/// Text fed to the ranking model for one record.
fn document_text(r: &AgentRecord) -> String {
    let mut parts: Vec<String> = Vec::new();
    for _ in 0..3 {
        parts.push(r.name.clone());
    }
    for _ in 0..2 {
        parts.push(r.description.clone());
    }
    parts.push(r.category.as_str().to_string());
    parts.extend(r.frameworks.iter().map(|f| f.as_str().to_string()));
    parts.extend(r.llm_providers.iter().map(|p| p.as_str().to_string()));
    parts.push(r.design_pattern.as_str().to_string());
    parts.push(r.complexity.as_str().to_string());
    parts.extend(r.tags.iter().cloned());
    parts.join(" ")
}

/// Lowercased text scanned by the substring fallback.
pub fn haystack(r: &AgentRecord) -> String {
    let mut parts: Vec<&str> = vec![r.name.as_str(), r.description.as_str(), r.category.as_str()];
    parts.extend(r.frameworks.iter().map(|f| f.as_str()));
    parts.extend(r.llm_providers.iter().map(|p| p.as_str()));
    parts.join(" ").to_lowercase()
}

/// Scores each haystack by how many query tokens it contains, dropping
/// zero scores. Indices refer to `haystacks`.
pub fn substring_scores(haystacks: &[String], tokens: &[String]) -> Vec<(usize, f64)> {
    haystacks
        .iter()
        .enumerate()
        .map(|(i, hay)| {
            let hits = tokens.iter().filter(|t| hay.contains(t.as_str())).count();
            (i, hits as f64)
        })
        .filter(|(_, s)| *s > 0.0)
        .collect()
}

/// Distinct values present in `records` for each filterable field.
///
/// Categories, frameworks and providers are sorted alphabetically;
/// complexities follow their natural order (beginner → advanced).
pub fn filter_options_for(records: &[AgentRecord]) -> FilterOptions {
    let mut categories = BTreeSet::new();
    let mut frameworks = BTreeSet::new();
    let mut providers = BTreeSet::new();
    let mut complexities = BTreeSet::new();
    for r in records {
        categories.insert(r.category.as_str());
        frameworks.extend(r.frameworks.iter().map(|f| f.as_str()));
        providers.extend(r.llm_providers.iter().map(|p| p.as_str()));
        complexities.insert(r.complexity);
    }
    FilterOptions {
        categories: categories.into_iter().map(str::to_string).collect(),
        frameworks: frameworks.into_iter().map(str::to_string).collect(),
        providers: providers.into_iter().map(str::to_string).collect(),
        complexities: complexities
            .into_iter()
            .map(|c| c.as_str().to_string())
            .collect(),
    }
}

impl AgentSearch {
    /// Builds the index. Records with an empty or duplicate id are skipped;
    /// the first occurrence of an id wins.
    pub fn build(records: Vec<AgentRecord>) -> Self {
        Self::with_cache_capacity(records, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(records: Vec<AgentRecord>, capacity: usize) -> Self {
        let mut kept: Vec<AgentRecord> = Vec::with_capacity(records.len());
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for record in records {
            let id = record.id.trim();
            if id.is_empty() || by_id.contains_key(id) {
                continue;
            }
            by_id.insert(id.to_string(), kept.len());
            kept.push(record);
        }

        let corpus: Vec<Vec<String>> = kept
            .iter()
            .map(|r| {
                let tokens = tokenize(&document_text(r));
                if tokens.is_empty() {
                    vec![r.id.to_lowercase()]
                } else {
                    tokens
                }
            })
            .collect();
        let haystacks = kept.iter().map(haystack).collect();

        Self {
            bm25: Bm25::new(&corpus),
            records: kept,
            by_id,
            haystacks,
            cache: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in insertion order.
    pub fn records(&self) -> &[AgentRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&AgentRecord> {
        self.by_id.get(id).map(|&i| &self.records[i])
    }

    /// Ranks the corpus against `query`, applies `filters` and keeps at most
    /// `limit` results. Results are memoized per `(query, filters, limit)`.
    pub fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> Vec<SearchHit> {
        let key = QueryKey {
            query: query.trim().to_lowercase(),
            filters: filters.clone().normalized(),
            limit,
        };
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let results = self.rank(&key.query, &key.filters, limit);
        self.cache.insert(key, results.clone());
        results
    }

    fn rank(&self, query: &str, filters: &SearchFilters, limit: usize) -> Vec<SearchHit> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return self
                .records
                .iter()
                .filter(|r| filters.matches(r))
                .take(limit)
                .map(|r| SearchHit {
                    record: r.clone(),
                    score: None,
                })
                .collect();
        }

        let mut scored: Vec<(usize, f64)> = self
            .bm25
            .scores(&tokens)
            .into_iter()
            .enumerate()
            .collect();

        if !scored.iter().any(|(_, s)| *s > 0.0) {
            scored = substring_scores(&self.haystacks, &tokens);
        }

        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .filter(|(i, _)| filters.matches(&self.records[*i]))
            .take(limit)
            .map(|(i, score)| SearchHit {
                record: self.records[i].clone(),
                score: Some(score),
            })
            .collect()
    }

    /// Distinct values present in the corpus; see [`filter_options_for`].
    pub fn filter_options(&self) -> FilterOptions {
        filter_options_for(&self.records)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Complexity, Framework, LlmProvider};

    fn rec(id: &str, name: &str, category: Category) -> AgentRecord {
        let mut r = AgentRecord::new(id, name);
        r.category = category;
        r
    }

    fn three_bots() -> AgentSearch {
        AgentSearch::build(vec![
            rec("pdf_chat_bot", "PDF Chat Bot", Category::Rag),
            rec("voice_assistant", "Voice Assistant", Category::Voice),
            rec("slack_bot", "Slack Bot", Category::Chatbot),
        ])
    }

    fn names(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.record.name.as_str()).collect()
    }

    #[test]
    fn bot_query_ranks_token_overlap_first() {
        let engine = three_bots();
        let hits = engine.search("bot", &SearchFilters::default(), 10);
        let order = names(&hits);
        let voice = order.iter().position(|n| *n == "Voice Assistant");
        let pdf = order.iter().position(|n| *n == "PDF Chat Bot").unwrap();
        let slack = order.iter().position(|n| *n == "Slack Bot").unwrap();
        if let Some(v) = voice {
            assert!(pdf < v && slack < v, "order was {:?}", order);
        }
        assert!(hits[0].score.unwrap() > 0.0);
    }

    #[test]
    fn bot_query_with_category_filter() {
        let engine = three_bots();
        let filters = SearchFilters {
            categories: vec!["chatbot".into()],
            ..Default::default()
        };
        let hits = engine.search("bot", &filters, 10);
        assert_eq!(names(&hits), vec!["Slack Bot"]);
    }

    #[test]
    fn empty_query_returns_insertion_order() {
        let engine = three_bots();
        let hits = engine.search("", &SearchFilters::default(), 10);
        assert_eq!(
            names(&hits),
            vec!["PDF Chat Bot", "Voice Assistant", "Slack Bot"]
        );
        assert!(hits.iter().all(|h| h.score.is_none()));

        let truncated = engine.search("   ", &SearchFilters::default(), 2);
        assert_eq!(names(&truncated), vec!["PDF Chat Bot", "Voice Assistant"]);
    }

    #[test]
    fn unmatched_query_is_empty() {
        let engine = three_bots();
        assert!(engine
            .search("xyz123", &SearchFilters::default(), 10)
            .is_empty());
    }

    #[test]
    fn stopword_only_query_lists_corpus() {
        let engine = three_bots();
        let hits = engine.search("the", &SearchFilters::default(), 10);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn substring_fallback_finds_partial_tokens() {
        // A single-document corpus has a negative idf floor, so BM25 never
        // scores above zero and the fallback decides.
        let engine = AgentSearch::build(vec![rec("chatbots", "Chatbots Galore", Category::Chatbot)]);
        let hits = engine.search("chatbot", &SearchFilters::default(), 10);
        assert_eq!(names(&hits), vec!["Chatbots Galore"]);
    }

    #[test]
    fn scores_are_non_increasing() {
        let mut corpus = Vec::new();
        for (i, name) in [
            "LangChain RAG over PDFs",
            "Multi agent research crew",
            "RAG chatbot with memory",
            "Stock trading agent",
            "Voice RAG assistant",
            "Image captioning",
        ]
        .iter()
        .enumerate()
        {
            let mut r = rec(&format!("a{}", i), name, Category::Other);
            r.description = format!("{} example project", name);
            r.frameworks = vec![Framework::Langchain];
            r.llm_providers = vec![LlmProvider::Openai];
            corpus.push(r);
        }
        let engine = AgentSearch::build(corpus);
        for q in ["rag", "agent research", "rag chatbot memory", "langchain"] {
            let hits = engine.search(q, &SearchFilters::default(), 50);
            let scores: Vec<f64> = hits.iter().map(|h| h.score.unwrap()).collect();
            assert!(
                scores.windows(2).all(|w| w[0] >= w[1]),
                "query {:?} scores {:?}",
                q,
                scores
            );
        }
    }

    #[test]
    fn category_filter_only_returns_matching_records() {
        let mut corpus = Vec::new();
        for (i, cat) in [Category::Rag, Category::Chatbot, Category::Rag, Category::Agent]
            .into_iter()
            .enumerate()
        {
            corpus.push(rec(&format!("r{}", i), &format!("Project {}", i), cat));
        }
        let engine = AgentSearch::build(corpus);
        let filters = SearchFilters {
            categories: vec!["rag".into()],
            ..Default::default()
        };
        for q in ["", "project", "nothing-here"] {
            for hit in engine.search(q, &filters, 10) {
                assert_eq!(hit.record.category, Category::Rag);
            }
        }
        assert_eq!(engine.search("", &filters, 10).len(), 2);
    }

    #[test]
    fn repeated_search_hits_cache() {
        let engine = three_bots();
        let first = engine.search("slack", &SearchFilters::default(), 5);
        let second = engine.search("  SLACK ", &SearchFilters::default(), 5);
        assert_eq!(first, second);
        let stats = engine.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let engine = AgentSearch::build(vec![
            rec("same", "First", Category::Rag),
            rec("same", "Second", Category::Voice),
        ]);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.get("same").unwrap().name, "First");
        assert!(engine.get("missing").is_none());
    }

    #[test]
    fn filter_options_reflect_corpus() {
        let mut a = rec("a", "A", Category::Voice);
        a.complexity = Complexity::Advanced;
        a.frameworks = vec![Framework::Langchain];
        a.llm_providers = vec![LlmProvider::Openai, LlmProvider::Anthropic];
        let mut b = rec("b", "B", Category::Chatbot);
        b.complexity = Complexity::Beginner;
        b.frameworks = vec![Framework::Crewai];
        let opts = AgentSearch::build(vec![a, b]).filter_options();
        assert_eq!(opts.categories, vec!["chatbot", "voice"]);
        assert_eq!(opts.frameworks, vec!["crewai", "langchain"]);
        assert_eq!(opts.providers, vec!["anthropic", "openai"]);
        assert_eq!(opts.complexities, vec!["beginner", "advanced"]);
    }
}
