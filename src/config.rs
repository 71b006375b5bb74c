//! Configuration loading.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. Built-in defaults (every field has one).
//! 2. The TOML file passed with `--config` (optional; a missing file means
//!    "defaults only").
//! 3. Environment variables, see [`apply_env_overrides`].
//!
//! Secrets (`ANTHROPIC_API_KEY`, `GITHUB_TOKEN`) are only ever read from the
//! environment and live in [`Secrets`], which is never deserialized.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_agents_path")]
    pub agents_path: PathBuf,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_http_cache_path")]
    pub http_cache_path: PathBuf,
    #[serde(default = "default_http_cache_ttl")]
    pub http_cache_ttl_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            agents_path: default_agents_path(),
            cache_path: default_cache_path(),
            http_cache_path: default_http_cache_path(),
            http_cache_ttl_secs: default_http_cache_ttl(),
        }
    }
}

fn default_agents_path() -> PathBuf {
    PathBuf::from("data/agents.json")
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("data/.indexer_cache.json")
}
fn default_http_cache_path() -> PathBuf {
    PathBuf::from("data/.http_cache.json")
}
fn default_http_cache_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_repo_url")]
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repo_url: default_repo_url(),
            branch: default_branch(),
        }
    }
}

fn default_repo_url() -> String {
    "https://github.com/Shubhamsaboo/awesome-llm-apps".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// LLM requests per second.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_max_readme_chars")]
    pub max_readme_chars: usize,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub fetch_stars: bool,
    #[serde(default = "default_timeout_secs")]
    pub llm_timeout_secs: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            rate_limit: default_rate_limit(),
            burst: default_burst(),
            max_readme_chars: default_max_readme_chars(),
            exclude_globs: Vec::new(),
            fetch_stars: false,
            llm_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_workers() -> usize {
    20
}
fn default_rate_limit() -> f64 {
    10.0
}
fn default_burst() -> u32 {
    20
}
fn default_max_readme_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Output token cap for README metadata extraction.
    #[serde(default = "default_extraction_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            max_tokens: default_extraction_max_tokens(),
        }
    }
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}
fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_extraction_max_tokens() -> u32 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// `memory` (BM25 over the JSON corpus) or `sqlite` (FTS5).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_search_cache_size")]
    pub cache_size: usize,
    /// Default number of results printed by `agent-nav search`.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            cache_size: default_search_cache_size(),
            max_results: default_max_results(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_search_cache_size() -> usize {
    500
}
fn default_max_results() -> usize {
    500
}
fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/agents.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed browser origins. `*` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_allow_origins: Vec<String>,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_allow_origins: default_cors_origins(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:8501".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:8501".to_string(),
    ]
}
fn default_rate_limit_requests() -> u32 {
    10
}
fn default_rate_limit_window() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ai_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_ai_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_ai_budget_path")]
    pub budget_path: PathBuf,
    #[serde(default = "default_daily_budget")]
    pub daily_budget_usd: f64,
    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_input_price")]
    pub input_usd_per_million: f64,
    #[serde(default = "default_output_price")]
    pub output_usd_per_million: f64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_path: default_ai_cache_path(),
            cache_ttl_secs: default_ai_cache_ttl(),
            budget_path: default_ai_budget_path(),
            daily_budget_usd: default_daily_budget(),
            max_tokens: default_ai_max_tokens(),
            input_usd_per_million: default_input_price(),
            output_usd_per_million: default_output_price(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ai_cache_path() -> PathBuf {
    PathBuf::from("data/.ai_selector_cache.json")
}
fn default_ai_cache_ttl() -> u64 {
    6 * 60 * 60
}
fn default_ai_budget_path() -> PathBuf {
    PathBuf::from("data/.ai_selector_budget.json")
}
fn default_daily_budget() -> f64 {
    5.0
}
fn default_ai_max_tokens() -> u32 {
    600
}
fn default_input_price() -> f64 {
    0.80
}
fn default_output_price() -> f64 {
    4.00
}

/// Credentials taken from the environment only.
#[derive(Clone, Default)]
pub struct Secrets {
    pub anthropic_api_key: Option<String>,
    pub github_token: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("github_token", &mask(&self.github_token))
            .finish()
    }
}

impl AiConfig {
    /// Rough USD cost of a request at the configured prices.
    pub fn estimate_cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_usd_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_usd_per_million
    }
}

impl Config {
    pub fn ai_selector_available(&self) -> bool {
        self.ai.enabled && self.secrets.anthropic_api_key.is_some()
    }
}

/// Loads, overrides from the process environment, and validates.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        tracing::debug!("no config file at {}, using defaults", path.display());
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, raw))
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Applies environment overrides through `lookup`, which is
/// `std::env::var` in production and a map in tests.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("AGENT_NAV_DATA_PATH") {
        config.data.agents_path = PathBuf::from(v);
    }
    if let Some(v) = get("AGENT_NAV_CACHE_PATH") {
        config.data.cache_path = PathBuf::from(v);
    }
    if let Some(v) = get("SOURCE_REPO_URL") {
        config.source.repo_url = v;
    }
    if let Some(v) = get("SOURCE_BRANCH") {
        config.source.branch = v;
    }
    if let Some(v) = get("ANTHROPIC_MODEL") {
        config.llm.model = v;
    }
    if let Some(v) = get("INDEXER_WORKERS") {
        config.indexer.workers = parse_env("INDEXER_WORKERS", &v)?;
    }
    if let Some(v) = get("INDEXER_RATE_LIMIT") {
        config.indexer.rate_limit = parse_env("INDEXER_RATE_LIMIT", &v)?;
    }
    if let Some(v) = get("SEARCH_BACKEND") {
        config.search.backend = v.trim().to_lowercase();
    }
    if let Some(v) = get("CORS_ALLOW_ORIGINS") {
        config.server.cors_allow_origins = v
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
    }
    if let Some(v) = get("RATE_LIMIT_REQUESTS") {
        config.server.rate_limit_requests = parse_env("RATE_LIMIT_REQUESTS", &v)?;
    }
    if let Some(v) = get("RATE_LIMIT_WINDOW") {
        config.server.rate_limit_window_secs = parse_env("RATE_LIMIT_WINDOW", &v)?;
    }
    if let Some(v) = get("AI_DAILY_BUDGET_USD") {
        config.ai.daily_budget_usd = parse_env("AI_DAILY_BUDGET_USD", &v)?;
    }
    if let Some(v) = get("AI_CACHE_TTL_SECONDS") {
        config.ai.cache_ttl_secs = parse_env("AI_CACHE_TTL_SECONDS", &v)?;
    }
    if let Some(v) = get("DISABLE_AI_SELECTOR") {
        if is_truthy(&v) {
            config.ai.enabled = false;
        }
    }

    config.secrets.anthropic_api_key = get("ANTHROPIC_API_KEY");
    config.secrets.github_token = get("GITHUB_TOKEN").or_else(|| get("GH_TOKEN"));
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.indexer.workers == 0 {
        bail!("indexer.workers must be >= 1");
    }
    if !(config.indexer.rate_limit.is_finite() && config.indexer.rate_limit > 0.0) {
        bail!("indexer.rate_limit must be a finite number > 0");
    }
    if config.indexer.burst == 0 {
        bail!("indexer.burst must be >= 1");
    }
    if config.search.cache_size == 0 {
        bail!("search.cache_size must be >= 1");
    }
    if config.search.max_results == 0 {
        bail!("search.max_results must be >= 1");
    }
    match config.search.backend.as_str() {
        "memory" | "sqlite" => {}
        other => bail!(
            "Unknown search backend: '{}'. Must be memory or sqlite.",
            other
        ),
    }
    if config.ai.daily_budget_usd < 0.0 {
        bail!("ai.daily_budget_usd must be >= 0");
    }
    if config.server.rate_limit_requests == 0 || config.server.rate_limit_window_secs == 0 {
        bail!("server.rate_limit_requests and server.rate_limit_window_secs must be >= 1");
    }
    Ok(())
}
