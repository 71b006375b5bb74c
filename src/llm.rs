//! Anthropic messages client and README metadata extraction.
//!
//! # Client
//!
//! [`CompletionClient`] is the seam between the application and the model.
//! [`AnthropicClient`] implements it over `reqwest`:
//!
//! - `POST {api_base}/v1/messages` with `x-api-key` and `anthropic-version`
//! - HTTP 429 / 5xx and network errors are retried with exponential backoff
//! - other 4xx fail immediately
//! - streaming parses the server-sent event stream into [`StreamEvent`]s
//!
//! # Extraction
//!
//! [`LlmExtractor`] asks the model for a JSON object describing a README,
//! then [`normalize_extraction`] forces every field into its vocabulary.
//! Callers fall back to [`crate::extract::heuristic_extract`] on any error.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

use agent_navigator_core::models::{
    tag_set, Category, Complexity, DesignPattern, Framework, LlmProvider, Vocabulary,
    API_KEY_NAMES,
};

use crate::extract::{truncate_chars, Extraction};
use crate::rate_limit::TokenBucket;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// One event of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Done(Usage),
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Streams the completion. The default runs [`complete`](Self::complete)
    /// and emits its text as a single delta.
    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let completion = self.complete(request).await?;
        let events = vec![
            Ok(StreamEvent::Delta(completion.text)),
            Ok(StreamEvent::Done(completion.usage)),
        ];
        Ok(futures_util::stream::iter(events).boxed())
    }
}

pub struct AnthropicClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn request(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": stream,
        });
        self.http
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s, ...
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }

            match self.request(request, false).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_message_response(&json);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!(
                            "Anthropic API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }
                    bail!("Anthropic API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Completion failed after retries")))
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.request(request, true).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Anthropic API error {}: {}", status, body_text);
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<StreamEvent>>(32);
        let mut bytes = response.bytes_stream();
        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            let mut usage = Usage::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                for data in decoder.push(&chunk) {
                    match apply_stream_data(&data, &mut usage) {
                        Ok(Some(text)) => {
                            if tx.send(Ok(StreamEvent::Delta(text))).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
            let _ = tx.send(Ok(StreamEvent::Done(usage))).await;
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Pulls the text blocks and usage out of a messages API response.
pub fn parse_message_response(json: &Value) -> Result<Completion> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: missing content array"))?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();

    let usage = json
        .get("usage")
        .map(|u| Usage {
            input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(Completion { text, usage })
}

/// Splits a byte stream into SSE `data:` payloads.
#[derive(Default)]
struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim_start().to_string());
            }
        }
        out
    }
}

/// Applies one streamed event payload. Returns text to forward, if any.
fn apply_stream_data(data: &str, usage: &mut Usage) -> Result<Option<String>> {
    let event: Value = serde_json::from_str(data).context("Invalid stream event")?;
    match event.get("type").and_then(|t| t.as_str()) {
        Some("message_start") => {
            if let Some(n) = event
                .pointer("/message/usage/input_tokens")
                .and_then(|v| v.as_u64())
            {
                usage.input_tokens = n;
            }
            Ok(None)
        }
        Some("content_block_delta") => Ok(event
            .pointer("/delta/text")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string)),
        Some("message_delta") => {
            if let Some(n) = event
                .pointer("/usage/output_tokens")
                .and_then(|v| v.as_u64())
            {
                usage.output_tokens = n;
            }
            Ok(None)
        }
        Some("error") => {
            let message = event
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown stream error");
            bail!("Anthropic stream error: {}", message)
        }
        _ => Ok(None),
    }
}

const EXTRACTION_PROMPT: &str = r#"Analyze this LLM application README and extract structured metadata.

README Content:
```
{readme}
```

Folder path: {folder_path}

Extract the following as JSON (be precise, don't hallucinate):

{
  "name": "Human-readable name (from title or folder name)",
  "description": "One-sentence summary of what this app does (max 120 chars)",
  "category": "One of: rag, chatbot, agent, multi_agent, automation, search, vision, voice, coding, finance, research, other",
  "frameworks": ["List frameworks used: langchain, llamaindex, crewai, autogen, phidata, dspy, haystack, semantic_kernel, raw_api, other"],
  "llm_providers": ["List LLM providers: openai, anthropic, google, cohere, mistral, ollama, huggingface, local, other"],
  "requires_gpu": false,
  "supports_local_models": false,
  "design_pattern": "One of: rag, react, plan_and_execute, reflection, multi_agent, tool_use, simple_chat, other",
  "complexity": "One of: beginner, intermediate, advanced",
  "quick_start": "Copy-pasteable install + run commands (extract from README, or generate sensible default)",
  "api_keys": ["List required API key env vars if explicitly mentioned"]
}

Rules:
- If unsure about a field, use the most conservative/common option.
- frameworks and llm_providers must be arrays, even if single item.
- requires_gpu: true only if explicitly mentioned.
- supports_local_models: true if ollama, llama.cpp, vLLM, GGUF, etc. are mentioned.
- Return ONLY valid JSON (no markdown, no explanation).
"#;

pub fn extraction_prompt(readme: &str, folder_path: &str, max_readme_chars: usize) -> String {
    EXTRACTION_PROMPT
        .replace("{readme}", &truncate_chars(readme, max_readme_chars))
        .replace("{folder_path}", folder_path)
}

/// Parses a model reply as JSON, tolerating a surrounding code fence.
pub fn parse_json_reply(text: &str) -> Result<Value> {
    let mut body = text.trim();
    if body.starts_with("```") {
        if let Some(inner) = body.split("```").nth(1) {
            body = inner.trim();
        }
        if let Some(rest) = body.strip_prefix("json") {
            body = rest.trim();
        }
    }
    serde_json::from_str(body).context("Model reply is not valid JSON")
}

fn as_list(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
        Some(other) => vec![value_to_string(other)],
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v) => value_to_string(v).trim().to_string(),
    }
}

fn as_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Coerces free-form model output into an [`Extraction`].
///
/// Unknown vocabulary values are dropped or defaulted, the description is
/// capped at 160 chars and the quick start at 1200. An empty name is left
/// empty for the caller to fill.
pub fn normalize_extraction(value: &Value) -> Extraction {
    let get = |key: &str| value.get(key);
    Extraction {
        name: as_text(get("name")),
        description: truncate_chars(&as_text(get("description")), 160),
        category: Category::coerce(&as_text(get("category"))),
        frameworks: tag_set::<Framework, _, _>(as_list(get("frameworks"))),
        llm_providers: tag_set::<LlmProvider, _, _>(as_list(get("llm_providers"))),
        requires_gpu: as_flag(get("requires_gpu")),
        supports_local_models: as_flag(get("supports_local_models")),
        design_pattern: DesignPattern::coerce(&as_text(get("design_pattern"))),
        complexity: Complexity::coerce(&as_text(get("complexity"))),
        quick_start: truncate_chars(&as_text(get("quick_start")), 1200),
        api_keys: as_list(get("api_keys"))
            .into_iter()
            .filter(|k| API_KEY_NAMES.contains(&k.as_str()))
            .collect(),
    }
}

/// Rate-limited README extraction through a [`CompletionClient`].
pub struct LlmExtractor {
    client: Arc<dyn CompletionClient>,
    bucket: Arc<TokenBucket>,
    model: String,
    max_tokens: u32,
    max_readme_chars: usize,
}

impl LlmExtractor {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        bucket: Arc<TokenBucket>,
        model: impl Into<String>,
        max_tokens: u32,
        max_readme_chars: usize,
    ) -> Self {
        Self {
            client,
            bucket,
            model: model.into(),
            max_tokens,
            max_readme_chars,
        }
    }

    pub async fn extract(&self, readme: &str, folder_path: &str) -> Result<Extraction> {
        self.bucket.acquire().await;
        let request = CompletionRequest {
            model: self.model.clone(),
            prompt: extraction_prompt(readme, folder_path, self.max_readme_chars),
            max_tokens: self.max_tokens,
        };
        let completion = self.client.complete(&request).await?;
        let value = parse_json_reply(&completion.text)?;
        if !value.is_object() {
            bail!("Model reply is not a JSON object");
        }
        Ok(normalize_extraction(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedClient {
        reply: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for CannedClient {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                text: self.reply.clone(),
                usage: Usage {
                    input_tokens: 100,
                    output_tokens: 20,
                },
            })
        }
    }

    #[test]
    fn fenced_json_is_accepted() {
        let v = parse_json_reply("```json\n{\"name\": \"X\"}\n```").unwrap();
        assert_eq!(v["name"], "X");
        let v = parse_json_reply("  {\"a\": 1} ").unwrap();
        assert_eq!(v["a"], 1);
        assert!(parse_json_reply("Sure! Here you go").is_err());
    }

    #[test]
    fn normalization_coerces_vocabularies() {
        let v: Value = serde_json::json!({
            "name": "  Travel Planner ",
            "description": "x".repeat(300),
            "category": "Multi-Agent",
            "frameworks": "crewai",
            "llm_providers": ["openai", "skynet"],
            "requires_gpu": "true",
            "design_pattern": "galaxy_brain",
            "complexity": "EXPERT",
            "api_keys": ["OPENAI_API_KEY", "MY_SECRET"]
        });
        let e = normalize_extraction(&v);
        assert_eq!(e.name, "Travel Planner");
        assert_eq!(e.description.chars().count(), 160);
        assert_eq!(e.category, Category::MultiAgent);
        assert_eq!(e.frameworks, vec![Framework::Crewai]);
        assert_eq!(e.llm_providers, vec![LlmProvider::Openai]);
        assert!(e.requires_gpu);
        assert!(!e.supports_local_models);
        assert_eq!(e.design_pattern, DesignPattern::Other);
        assert_eq!(e.complexity, Complexity::Intermediate);
        assert_eq!(e.api_keys, vec!["OPENAI_API_KEY"]);
        assert_eq!(e.quick_start, "");
    }

    #[test]
    fn empty_lists_become_other() {
        let e = normalize_extraction(&serde_json::json!({ "frameworks": [], "llm_providers": null }));
        assert_eq!(e.frameworks, vec![Framework::Other]);
        assert_eq!(e.llm_providers, vec![LlmProvider::Other]);
        assert_eq!(e.category, Category::Other);
    }

    #[test]
    fn prompt_truncates_readme() {
        let prompt = extraction_prompt(&"é".repeat(50), "a/b", 10);
        assert!(prompt.contains(&"é".repeat(10)));
        assert!(!prompt.contains(&"é".repeat(11)));
        assert!(prompt.contains("Folder path: a/b"));
        assert!(prompt.contains("\"category\": \"One of: rag"));
    }

    #[test]
    fn response_parsing_joins_text_blocks() {
        let json = serde_json::json!({
            "content": [
                {"type": "text", "text": "Hello "},
                {"type": "tool_use", "id": "t"},
                {"type": "text", "text": "world"}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 3}
        });
        let c = parse_message_response(&json).unwrap();
        assert_eq!(c.text, "Hello world");
        assert_eq!(c.usage, Usage { input_tokens: 12, output_tokens: 3 });
        assert!(parse_message_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn sse_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: content_block_delta\ndata: {\"ty").is_empty());
        let out = decoder.push(b"pe\":\"x\"}\r\n\n");
        assert_eq!(out, vec!["{\"type\":\"x\"}"]);
    }

    #[test]
    fn stream_events_track_usage_and_text() {
        let mut usage = Usage::default();
        assert_eq!(
            apply_stream_data(
                r#"{"type":"message_start","message":{"usage":{"input_tokens":40}}}"#,
                &mut usage
            )
            .unwrap(),
            None
        );
        assert_eq!(
            apply_stream_data(
                r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#,
                &mut usage
            )
            .unwrap()
            .as_deref(),
            Some("Hi")
        );
        apply_stream_data(
            r#"{"type":"message_delta","usage":{"output_tokens":9}}"#,
            &mut usage,
        )
        .unwrap();
        assert_eq!(usage, Usage { input_tokens: 40, output_tokens: 9 });
        assert!(apply_stream_data(
            r#"{"type":"error","error":{"message":"overloaded"}}"#,
            &mut usage
        )
        .is_err());
    }

    #[tokio::test]
    async fn extractor_parses_canned_reply() {
        let client = Arc::new(CannedClient {
            reply: "```json\n{\"name\":\"Bot\",\"category\":\"chatbot\",\"frameworks\":[\"langchain\"]}\n```"
                .into(),
            calls: AtomicUsize::new(0),
        });
        let extractor = LlmExtractor::new(
            client.clone(),
            Arc::new(TokenBucket::new(100.0, 5)),
            "test-model",
            900,
            8000,
        );
        let e = extractor.extract("# Bot", "bots/bot").await.unwrap();
        assert_eq!(e.name, "Bot");
        assert_eq!(e.category, Category::Chatbot);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let client = CannedClient {
            reply: "text".into(),
            calls: AtomicUsize::new(0),
        };
        let request = CompletionRequest {
            model: "m".into(),
            prompt: "p".into(),
            max_tokens: 1,
        };
        let events: Vec<StreamEvent> = client
            .stream(&request)
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events[0], StreamEvent::Delta("text".into()));
        assert!(matches!(events[1], StreamEvent::Done(_)));
    }
}
