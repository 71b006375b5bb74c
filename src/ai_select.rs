//! AI-assisted agent selection.
//!
//! Given a user request and a list of candidate records (from keyword
//! search), asks the model to pick the best five and explain why. Every
//! call is guarded by a persisted reply cache and a daily spend cap.
//!
//! Flow for one request:
//!
//! 1. [`AiSelector::prepare`] builds the prompt and the cache key.
//! 2. A cache hit is returned as-is, with `cached: true`.
//! 3. Otherwise the estimated cost is checked against the [`DailyBudget`].
//! 4. The model is called (blocking or streamed), the reply is sanitized,
//!    recommendations are parsed, and the actual cost is recorded.

use anyhow::Result;
use futures_util::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tokio_stream::wrappers::ReceiverStream;

use agent_navigator_core::models::{AgentRecord, Vocabulary};

use crate::budget::DailyBudget;
use crate::config::AiConfig;
use crate::llm::{CompletionClient, CompletionRequest, StreamEvent, Usage};
use crate::ttl_cache::TtlCache;

/// Candidates listed in the prompt at most.
pub const MAX_PROMPT_CANDIDATES: usize = 80;
const DESCRIPTION_CHARS: usize = 220;
const MAX_REPLY_CHARS: usize = 10_000;

static QUERY_FILLERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(best|top|good|great|excellent|recommended)\b",
        r"\b(show me|find|get|give me|i need|i want)\b",
        r"\b(please|thanks|thank you)\b",
        r"\b(a|an|the)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("filler pattern is valid"))
    .collect()
});

static PLURAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\w+)s\b").expect("plural pattern is valid"));

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));

static RECOMMENDATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\d+[.)]\s*\*\*\s*`?([A-Za-z0-9_-]+)`?\s*\*\*\s*[:\-–—]?\s*(.*)$")
        .expect("recommendation pattern is valid")
});

pub fn build_prompt(query: &str, candidates: &[AgentRecord], max_agents: usize) -> String {
    let lines: Vec<String> = candidates
        .iter()
        .take(max_agents.min(MAX_PROMPT_CANDIDATES))
        .filter(|a| !a.id.trim().is_empty())
        .map(|a| {
            let description = a.description.trim();
            let description = if description.chars().count() > DESCRIPTION_CHARS {
                format!(
                    "{}…",
                    description.chars().take(DESCRIPTION_CHARS).collect::<String>()
                )
            } else {
                description.to_string()
            };
            let frameworks: Vec<&str> = a.frameworks.iter().take(3).map(|f| f.as_str()).collect();
            format!(
                "- {}: {} — {} [{}; {}]",
                a.id.trim(),
                a.name.trim(),
                description,
                a.category.as_str(),
                frameworks.join(", ")
            )
        })
        .collect();

    format!(
        "You recommend the best matching agent examples.\n\n\
         Available Agents:\n{}\n\n\
         User Request: \"{}\"\n\n\
         Return the top 5 agent IDs with 1-2 sentences each:\n\
         1. **agent_id**: reason\n\
         ...\n\
         If nothing fits, say what tags/frameworks the user should search for.\n",
        lines.join("\n"),
        query
    )
}

/// Lowercases, drops filler words and trailing plural `s`, so that
/// "show me the best RAG examples" and "rag example" share a cache entry.
pub fn normalize_query(query: &str) -> String {
    let mut normalized = query.trim().to_lowercase();
    for pattern in QUERY_FILLERS.iter() {
        normalized = pattern.replace_all(&normalized, " ").into_owned();
    }
    let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    PLURAL.replace_all(&collapsed, "$1").into_owned()
}

pub fn cache_key(model: &str, query: &str, candidate_ids: &[String]) -> String {
    let ids: Vec<&str> = candidate_ids
        .iter()
        .map(String::as_str)
        .filter(|id| !id.is_empty())
        .collect();
    let material = format!("{}\n{}\n{}", model, normalize_query(query), ids.join(","));
    let digest = Sha256::digest(material.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// About four characters per token; used only for the budget pre-check.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

/// Strips control characters and markup, and caps the length.
pub fn sanitize_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();
    let stripped = HTML_TAG.replace_all(&cleaned, "");
    stripped.trim().chars().take(MAX_REPLY_CHARS).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub reason: String,
}

/// Reads `N. **id**: reason` lines, keeping ids that were offered.
pub fn parse_recommendations(text: &str, candidate_ids: &[String]) -> Vec<Recommendation> {
    let allowed: HashSet<&str> = candidate_ids.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    RECOMMENDATION_LINE
        .captures_iter(text)
        .filter_map(|caps| {
            let id = caps[1].to_string();
            if !allowed.contains(id.as_str()) || !seen.insert(id.clone()) {
                return None;
            }
            Some(Recommendation {
                id,
                reason: caps[2].trim().to_string(),
            })
        })
        .collect()
}

/// What the reply cache stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub model: String,
    pub text: String,
    pub usage: Usage,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectResponse {
    pub cached: bool,
    pub model: String,
    pub text: String,
    pub recommendations: Vec<Recommendation>,
    pub usage: Usage,
    pub cost_usd: f64,
}

/// One server-sent event of a streamed selection.
#[derive(Debug, Clone)]
pub enum SelectEvent {
    Delta { text: String, cached: bool },
    Done(SelectResponse),
    Error(String),
}

#[derive(Debug)]
pub enum SelectError {
    BudgetExceeded { spent_usd: f64, limit_usd: f64 },
    Upstream(anyhow::Error),
}

impl std::fmt::Display for SelectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectError::BudgetExceeded {
                spent_usd,
                limit_usd,
            } => write!(
                f,
                "Daily AI budget exceeded (${:.4} of ${:.2} spent)",
                spent_usd, limit_usd
            ),
            SelectError::Upstream(e) => write!(f, "Upstream model error: {}", e),
        }
    }
}

impl std::error::Error for SelectError {}

/// A request ready to send: prompt plus everything needed to cache it.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub prompt: String,
    pub cache_key: String,
    pub candidate_ids: Vec<String>,
}

pub struct AiSelector {
    client: Arc<dyn CompletionClient>,
    model: String,
    settings: AiConfig,
    cache: Arc<TtlCache<CachedAnswer>>,
    budget: Arc<DailyBudget>,
}

impl AiSelector {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>, settings: AiConfig) -> Self {
        let cache = Arc::new(TtlCache::load(&settings.cache_path, settings.cache_ttl_secs));
        let budget = Arc::new(DailyBudget::load(
            &settings.budget_path,
            settings.daily_budget_usd,
        ));
        Self {
            client,
            model: model.into(),
            settings,
            cache,
            budget,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn prepare(&self, query: &str, candidates: &[AgentRecord], max_candidates: usize) -> Prepared {
        let candidate_ids: Vec<String> = candidates
            .iter()
            .take(max_candidates)
            .map(|a| a.id.clone())
            .collect();
        Prepared {
            prompt: build_prompt(query, candidates, max_candidates),
            cache_key: cache_key(&self.model, query, &candidate_ids),
            candidate_ids,
        }
    }

    pub fn cached(&self, prepared: &Prepared) -> Option<SelectResponse> {
        self.cache.get(&prepared.cache_key).map(|hit| SelectResponse {
            cached: true,
            recommendations: parse_recommendations(&hit.text, &prepared.candidate_ids),
            model: hit.model,
            text: hit.text,
            usage: hit.usage,
            cost_usd: hit.cost_usd,
        })
    }

    /// Rejects the call when its worst-case cost would exceed today's cap.
    pub fn check_budget(&self, prepared: &Prepared) -> Result<(), SelectError> {
        let estimate = self.settings.estimate_cost_usd(
            estimate_tokens(&prepared.prompt),
            u64::from(self.settings.max_tokens),
        );
        if self.budget.allows(estimate) {
            Ok(())
        } else {
            Err(SelectError::BudgetExceeded {
                spent_usd: self.budget.spent_today(),
                limit_usd: self.budget.limit_usd(),
            })
        }
    }

    fn request(&self, prepared: &Prepared) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            prompt: prepared.prompt.clone(),
            max_tokens: self.settings.max_tokens,
        }
    }

    /// Sanitizes, prices, records and caches a finished reply. The budget
    /// and cache files are written on the blocking pool.
    async fn finish(&self, prepared: &Prepared, raw_text: &str, usage: Usage) -> SelectResponse {
        let text = sanitize_text(raw_text);
        let cost_usd = self
            .settings
            .estimate_cost_usd(usage.input_tokens, usage.output_tokens);
        tracing::info!(
            cost_usd,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "ai selector call"
        );

        let budget = Arc::clone(&self.budget);
        let cache = Arc::clone(&self.cache);
        let key = prepared.cache_key.clone();
        let answer = CachedAnswer {
            model: self.model.clone(),
            text: text.clone(),
            usage,
            cost_usd,
        };
        let persisted = tokio::task::spawn_blocking(move || {
            if let Err(e) = budget.record(cost_usd) {
                tracing::warn!("failed to persist AI budget: {}", e);
            }
            cache.insert(key, answer);
            if let Err(e) = cache.save() {
                tracing::warn!("failed to persist AI cache: {}", e);
            }
        })
        .await;
        if let Err(e) = persisted {
            tracing::warn!("AI bookkeeping task failed: {}", e);
        }

        SelectResponse {
            cached: false,
            model: self.model.clone(),
            recommendations: parse_recommendations(&text, &prepared.candidate_ids),
            text,
            usage,
            cost_usd,
        }
    }

    pub async fn select(&self, prepared: &Prepared) -> Result<SelectResponse, SelectError> {
        if let Some(hit) = self.cached(prepared) {
            return Ok(hit);
        }
        self.check_budget(prepared)?;
        let completion = self
            .client
            .complete(&self.request(prepared))
            .await
            .map_err(SelectError::Upstream)?;
        Ok(self
            .finish(prepared, &completion.text, completion.usage)
            .await)
    }

    /// Streams a selection as [`SelectEvent`]s. Budget and upstream
    /// failures arrive as a final `Error` event.
    pub fn stream(self: Arc<Self>, prepared: Prepared) -> ReceiverStream<SelectEvent> {
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        tokio::spawn(async move {
            if let Some(hit) = self.cached(&prepared) {
                let _ = tx
                    .send(SelectEvent::Delta {
                        text: hit.text.clone(),
                        cached: true,
                    })
                    .await;
                let _ = tx.send(SelectEvent::Done(hit)).await;
                return;
            }
            if let Err(e) = self.check_budget(&prepared) {
                let _ = tx.send(SelectEvent::Error(e.to_string())).await;
                return;
            }

            let mut events = match self.client.stream(&self.request(&prepared)).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!("ai selector stream failed to start: {}", e);
                    let _ = tx.send(SelectEvent::Error("Upstream error".into())).await;
                    return;
                }
            };

            let mut text = String::new();
            while let Some(event) = events.next().await {
                match event {
                    Ok(StreamEvent::Delta(delta)) => {
                        text.push_str(&delta);
                        let out = SelectEvent::Delta {
                            text: delta,
                            cached: false,
                        };
                        if tx.send(out).await.is_err() {
                            return;
                        }
                    }
                    Ok(StreamEvent::Done(usage)) => {
                        let response = self.finish(&prepared, &text, usage).await;
                        let _ = tx.send(SelectEvent::Done(response)).await;
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("ai selector stream failed: {}", e);
                        let _ = tx.send(SelectEvent::Error("Upstream error".into())).await;
                        return;
                    }
                }
            }
            let _ = tx
                .send(SelectEvent::Error("Upstream stream ended early".into()))
                .await;
        });
        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use agent_navigator_core::models::{Category, Framework};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Scripted {
        reply: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                text: self.reply.clone(),
                usage: Usage {
                    input_tokens: 1_000,
                    output_tokens: 200,
                },
            })
        }
    }

    fn candidates() -> Vec<AgentRecord> {
        let mut a = AgentRecord::new("pdf_chat", "PDF Chat");
        a.description = "Chat with PDFs".into();
        a.category = Category::Rag;
        a.frameworks = vec![Framework::Langchain, Framework::Llamaindex];
        let b = AgentRecord::new("slack_bot", "Slack Bot");
        vec![a, b]
    }

    fn settings(dir: &TempDir, budget: f64) -> AiConfig {
        AiConfig {
            cache_path: dir.path().join("ai_cache.json"),
            budget_path: dir.path().join("ai_budget.json"),
            daily_budget_usd: budget,
            ..AiConfig::default()
        }
    }

    #[test]
    fn prompt_lists_candidates() {
        let mut long = AgentRecord::new("long", "Long");
        long.description = "d".repeat(300);
        let mut all = candidates();
        all.push(long);
        let prompt = build_prompt("chat with docs", &all, 80);
        assert!(prompt.contains("- pdf_chat: PDF Chat — Chat with PDFs [rag; langchain, llamaindex]"));
        assert!(prompt.contains("- slack_bot: Slack Bot —  [other; ]"));
        assert!(prompt.contains(&format!("{}…", "d".repeat(220))));
        assert!(prompt.contains("User Request: \"chat with docs\""));
        assert!(prompt.contains("1. **agent_id**: reason"));
    }

    #[test]
    fn query_normalization_merges_phrasings() {
        assert_eq!(normalize_query("Show me the BEST RAG examples"), "rag example");
        assert_eq!(normalize_query("rag example"), "rag example");
        assert_eq!(normalize_query("  please   find a chatbot  "), "chatbot");
    }

    #[test]
    fn cache_key_depends_on_candidates() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let k1 = cache_key("m", "best rag examples", &ids);
        let k2 = cache_key("m", "rag example", &ids);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);
        assert_ne!(k1, cache_key("m", "rag example", &ids[..1]));
        assert_ne!(k1, cache_key("other-model", "rag example", &ids));
    }

    #[test]
    fn sanitize_strips_markup_and_controls() {
        assert_eq!(
            sanitize_text("<script>x</script>**Pick** this\u{0007} one\n"),
            "x**Pick** this one"
        );
        assert_eq!(sanitize_text(&"a".repeat(20_000)).len(), 10_000);
    }

    #[test]
    fn recommendations_keep_only_offered_ids() {
        let text = "Here you go:\n\
                    1. **pdf_chat**: Reads your PDFs.\n\
                    2. **made_up**: Not real.\n\
                    3. **slack_bot** - Lives in Slack.\n\
                    4. **pdf_chat**: Duplicate.";
        let ids = vec!["pdf_chat".to_string(), "slack_bot".to_string()];
        let recs = parse_recommendations(text, &ids);
        assert_eq!(
            recs,
            vec![
                Recommendation {
                    id: "pdf_chat".into(),
                    reason: "Reads your PDFs.".into()
                },
                Recommendation {
                    id: "slack_bot".into(),
                    reason: "Lives in Slack.".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn second_identical_request_is_cached() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(Scripted {
            reply: "1. **pdf_chat**: <b>Best</b> fit.".into(),
            calls: AtomicUsize::new(0),
        });
        let selector = AiSelector::new(client.clone(), "claude-test", settings(&dir, 5.0));
        let prepared = selector.prepare("pdf chat", &candidates(), 80);

        let first = selector.select(&prepared).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.text, "1. **pdf_chat**: Best fit.");
        assert_eq!(first.recommendations.len(), 1);
        // 1000 in at $0.80/M plus 200 out at $4/M.
        assert!((first.cost_usd - 0.0016).abs() < 1e-12);

        let second = selector.select(&prepared).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.text, first.text);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spend_and_answer_survive_a_restart() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(Scripted {
            reply: "1. **pdf_chat**: Best fit.".into(),
            calls: AtomicUsize::new(0),
        });
        let selector = AiSelector::new(client.clone(), "claude-test", settings(&dir, 5.0));
        let prepared = selector.prepare("pdf chat", &candidates(), 80);
        let first = selector.select(&prepared).await.unwrap();

        let reloaded = AiSelector::new(client.clone(), "claude-test", settings(&dir, 5.0));
        assert!((reloaded.budget.spent_today() - first.cost_usd).abs() < 1e-12);
        let hit = reloaded.select(&prepared).await.unwrap();
        assert!(hit.cached);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_blocks_calls() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(Scripted {
            reply: "anything".into(),
            calls: AtomicUsize::new(0),
        });
        let selector = AiSelector::new(client.clone(), "claude-test", settings(&dir, 0.0));
        let prepared = selector.prepare("pdf chat", &candidates(), 80);
        let err = selector.select(&prepared).await.unwrap_err();
        assert!(matches!(err, SelectError::BudgetExceeded { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_emits_delta_then_done() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(Scripted {
            reply: "1. **slack_bot**: Chat ops.".into(),
            calls: AtomicUsize::new(0),
        });
        let selector = Arc::new(AiSelector::new(client, "claude-test", settings(&dir, 5.0)));
        let prepared = selector.prepare("slack", &candidates(), 80);
        let events: Vec<SelectEvent> = selector.clone().stream(prepared.clone()).collect().await;
        assert!(matches!(&events[0], SelectEvent::Delta { cached: false, .. }));
        match &events[1] {
            SelectEvent::Done(resp) => assert_eq!(resp.recommendations[0].id, "slack_bot"),
            other => panic!("unexpected {:?}", other),
        }

        let cached: Vec<SelectEvent> = selector.stream(prepared).collect().await;
        assert!(matches!(&cached[0], SelectEvent::Delta { cached: true, .. }));
    }
}
