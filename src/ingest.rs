//! Indexer orchestration.
//!
//! Coordinates a full index run: discovery → per-README extraction (LLM or
//! heuristics, memoized by content hash) → record assembly → deduplication →
//! deterministic ordering → atomic JSON write.
//!
//! READMEs are processed by a bounded pool of tokio tasks gated by a
//! [`Semaphore`]; LLM calls additionally share one [`TokenBucket`].

use agent_navigator_core::models::{agent_id_from_folder, AgentRecord, Vocabulary};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::catalog::write_json_atomic;
use crate::config::Config;
use crate::discover::{discover_readmes, inspect_folder, FolderFacts, ReadmeCandidate};
use crate::extract::{
    extract_tags, fallback_description, heuristic_extract, title_from_path, Extraction,
    MIN_DESCRIPTION_CHARS,
};
use crate::github::{git_last_modified, parse_owner_repo, StarsClient};
use crate::llm::{AnthropicClient, CompletionClient, LlmExtractor};
use crate::progress::{ExtractionMode, IndexProgressEvent, IndexProgressReporter, ProgressMode};
use crate::rate_limit::TokenBucket;
use crate::ttl_cache::TtlCache;

const CACHE_VERSION: u32 = 1;

/// Cache tag for a heuristic result written after the LLM failed.
const FALLBACK_TAG: &str = "fallback";

/// Flags for one `agent-nav index` run. `None` falls back to config.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub repo: PathBuf,
    pub output: Option<PathBuf>,
    pub no_llm: bool,
    pub workers: Option<usize>,
    pub rate_limit: Option<f64>,
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub source_repo_url: Option<String>,
    pub source_branch: Option<String>,
    pub fetch_stars: bool,
    pub progress: ProgressMode,
}

impl IndexOptions {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            output: None,
            no_llm: false,
            workers: None,
            rate_limit: None,
            dry_run: false,
            limit: None,
            source_repo_url: None,
            source_branch: None,
            fetch_stars: false,
            progress: ProgressMode::Off,
        }
    }
}

/// Counters from a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    pub discovered: usize,
    pub written: usize,
    pub llm_extractions: u64,
    pub heuristic_extractions: u64,
    pub cache_hits: u64,
    pub duplicates_dropped: usize,
    pub by_category: BTreeMap<String, usize>,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    /// `llm`, `heuristic` (LLM off) or `fallback` (LLM failed).
    mode: String,
    extraction: Extraction,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

/// Content hash → extraction, shared by all workers.
struct ExtractionCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl ExtractionCache {
    fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<CacheFile>(&raw) {
                Ok(file) if file.version == CACHE_VERSION => file.entries,
                Ok(file) => {
                    tracing::warn!(
                        "ignoring extraction cache {} with version {}",
                        path.display(),
                        file.version
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    tracing::warn!(
                        "extraction cache {} is corrupt, starting fresh: {}",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Entries from a `--no-llm` run are skipped once the LLM is enabled.
    /// LLM results and LLM fallbacks are always reused.
    fn lookup(&self, hash: &str, llm_enabled: bool) -> Option<Extraction> {
        let entries = self.lock();
        let entry = entries.get(hash)?;
        if llm_enabled && entry.mode == ExtractionMode::Heuristic.as_str() {
            None
        } else {
            Some(entry.extraction.clone())
        }
    }

    fn store(&self, hash: String, tag: &str, extraction: &Extraction) {
        self.lock().insert(
            hash,
            CacheEntry {
                mode: tag.to_string(),
                extraction: extraction.clone(),
            },
        );
    }

    fn save(&self) -> Result<()> {
        let file = CacheFile {
            version: CACHE_VERSION,
            entries: self.lock().clone(),
        };
        write_json_atomic(&self.path, &file)
    }
}

/// Hex SHA-256 of the README text, truncated to 16 chars.
pub fn content_hash(readme: &str) -> String {
    let digest = Sha256::digest(readme.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// Link builders for one source repository.
#[derive(Debug, Clone)]
pub struct SourceLinks {
    repo_url: String,
    branch: String,
    owner_repo: Option<(String, String)>,
}

impl SourceLinks {
    pub fn new(repo_url: &str, branch: &str) -> Self {
        let repo_url = repo_url
            .trim()
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .to_string();
        Self {
            owner_repo: parse_owner_repo(&repo_url),
            repo_url,
            branch: branch.to_string(),
        }
    }

    pub fn github_url(&self, folder_path: &str) -> String {
        format!("{}/tree/{}/{}", self.repo_url, self.branch, folder_path)
    }

    pub fn clone_command(&self, folder_path: &str) -> String {
        let repo_name = self.repo_url.rsplit('/').next().unwrap_or("repo");
        format!(
            "git clone {}.git\ncd {}/{}",
            self.repo_url, repo_name, folder_path
        )
    }

    pub fn codespaces_url(&self) -> Option<String> {
        self.owner_repo
            .as_ref()
            .map(|(o, r)| format!("https://codespaces.new/{}/{}?quickstart=1", o, r))
    }

    pub fn colab_url(&self, folder_path: &str, notebook: &str) -> Option<String> {
        self.owner_repo.as_ref().map(|(o, r)| {
            format!(
                "https://colab.research.google.com/github/{}/{}/blob/{}/{}/{}",
                o, r, self.branch, folder_path, notebook
            )
        })
    }
}

/// Assembles the final record from an extraction and folder facts.
pub fn build_record(
    candidate: &ReadmeCandidate,
    readme: &str,
    extraction: Extraction,
    facts: &FolderFacts,
    links: &SourceLinks,
) -> AgentRecord {
    let folder = candidate.folder_path.as_str();
    let name = if extraction.name.trim().is_empty() {
        title_from_path(folder)
    } else {
        extraction.name.trim().to_string()
    };
    let mut record = AgentRecord::new(agent_id_from_folder(folder), name);

    record.description = if extraction.description.chars().count() < MIN_DESCRIPTION_CHARS {
        fallback_description(
            extraction.category,
            &extraction.frameworks,
            &extraction.llm_providers,
        )
    } else {
        extraction.description
    };
    record.category = extraction.category;
    record.frameworks = extraction.frameworks;
    record.llm_providers = extraction.llm_providers;
    record.complexity = extraction.complexity;
    record.design_pattern = extraction.design_pattern;
    record.requires_gpu = extraction.requires_gpu;
    record.supports_local_models = extraction.supports_local_models;
    record.quick_start = if extraction.quick_start.trim().is_empty() {
        crate::extract::extract_quick_start(readme, folder)
    } else {
        extraction.quick_start
    };

    let mut api_keys: Vec<String> = extraction
        .api_keys
        .into_iter()
        .chain(crate::extract::api_keys_mentioned(readme))
        .collect();
    api_keys.sort();
    api_keys.dedup();
    record.api_keys = api_keys;

    record.github_url = links.github_url(folder);
    record.folder_path = folder.to_string();
    record.readme_relpath = candidate.readme_relpath.clone();
    record.tags = extract_tags(readme, folder);
    record.clone_command = links.clone_command(folder);
    record.codespaces_url = links.codespaces_url();
    record.colab_url = facts
        .notebook
        .as_deref()
        .and_then(|nb| links.colab_url(folder, nb));
    record.languages = facts.languages.clone();
    record.content_hash = content_hash(readme);
    record
}

/// Shared state for one run's workers.
struct IndexContext {
    root: PathBuf,
    links: SourceLinks,
    extractor: Option<LlmExtractor>,
    cache: ExtractionCache,
    stars: Option<u64>,
    reporter: Box<dyn IndexProgressReporter>,
    done: AtomicU64,
    total: u64,
    llm_calls: AtomicU64,
    heuristic_runs: AtomicU64,
    cache_hits: AtomicU64,
}

async fn process_one(ctx: Arc<IndexContext>, candidate: ReadmeCandidate) -> Result<AgentRecord> {
    let bytes = tokio::fs::read(&candidate.readme_path)
        .await
        .with_context(|| format!("Failed to read {}", candidate.readme_path.display()))?;
    let readme = String::from_utf8_lossy(&bytes).into_owned();

    let folder = candidate.folder.clone();
    let facts = tokio::task::spawn_blocking(move || inspect_folder(&folder)).await?;

    let hash = content_hash(&readme);
    let llm_enabled = ctx.extractor.is_some();
    let (extraction, mode) = match ctx.cache.lookup(&hash, llm_enabled) {
        Some(hit) => {
            ctx.cache_hits.fetch_add(1, Ordering::Relaxed);
            (hit, ExtractionMode::Cached)
        }
        None => {
            let (extraction, mode, fell_back) =
                extract_fresh(&ctx, &readme, &candidate.folder_path, facts.file_count).await;
            let tag = if fell_back { FALLBACK_TAG } else { mode.as_str() };
            ctx.cache.store(hash, tag, &extraction);
            (extraction, mode)
        }
    };

    let mut record = build_record(&candidate, &readme, extraction, &facts, &ctx.links);
    record.updated_at = git_last_modified(&ctx.root, &candidate.readme_relpath).await;
    record.stars = ctx.stars;

    let n = ctx.done.fetch_add(1, Ordering::Relaxed) + 1;
    ctx.reporter.report(IndexProgressEvent::Extracted {
        id: record.id.clone(),
        mode,
        n,
        total: ctx.total,
    });
    Ok(record)
}

async fn extract_fresh(
    ctx: &IndexContext,
    readme: &str,
    folder_path: &str,
    file_count: usize,
) -> (Extraction, ExtractionMode, bool) {
    let attempted = ctx.extractor.is_some();
    if let Some(extractor) = &ctx.extractor {
        ctx.llm_calls.fetch_add(1, Ordering::Relaxed);
        match extractor.extract(readme, folder_path).await {
            Ok(extraction) => return (extraction, ExtractionMode::Llm, false),
            Err(e) => {
                tracing::warn!(
                    "LLM extraction failed for {}, using heuristics: {:#}",
                    folder_path,
                    e
                );
            }
        }
    }
    ctx.heuristic_runs.fetch_add(1, Ordering::Relaxed);
    (
        heuristic_extract(readme, folder_path, file_count),
        ExtractionMode::Heuristic,
        attempted,
    )
}

async fn fetch_stars(config: &Config, links: &SourceLinks) -> Option<u64> {
    let (owner, repo) = links.owner_repo.clone()?;
    let cache = TtlCache::load(&config.data.http_cache_path, config.data.http_cache_ttl_secs);
    let client = match StarsClient::new(config.secrets.github_token.clone(), cache) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("GitHub client unavailable: {}", e);
            return None;
        }
    };
    let stars = client.stars(&owner, &repo).await;
    if let Err(e) = client.flush() {
        tracing::warn!("failed to save HTTP cache: {}", e);
    }
    stars
}

/// Orders records by `(category, lowercase name, id)` after dropping
/// duplicate ids; the first occurrence wins. Returns the number dropped.
pub fn dedup_and_sort(records: &mut Vec<AgentRecord>) -> usize {
    let mut seen = HashSet::new();
    let before = records.len();
    records.retain(|r| {
        let fresh = seen.insert(r.id.clone());
        if !fresh {
            tracing::warn!("duplicate agent id {} from {}, dropping", r.id, r.folder_path);
        }
        fresh
    });
    records.sort_by(|a, b| {
        a.category
            .as_str()
            .cmp(b.category.as_str())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id))
    });
    before - records.len()
}

/// Runs the indexer with the Anthropic client when a key is configured.
pub async fn run_index(config: &Config, options: &IndexOptions) -> Result<()> {
    let client: Option<Arc<dyn CompletionClient>> = if options.no_llm || options.dry_run {
        None
    } else {
        match &config.secrets.anthropic_api_key {
            Some(key) => Some(Arc::new(AnthropicClient::new(
                &config.llm.api_base,
                key,
                Duration::from_secs(config.indexer.llm_timeout_secs),
            )?)),
            None => {
                tracing::warn!("ANTHROPIC_API_KEY is not set; using heuristic extraction");
                None
            }
        }
    };

    let Some(report) = index_with_client(config, options, client).await? else {
        return Ok(());
    };

    println!("index {}", options.repo.display());
    println!("  discovered: {}", report.discovered);
    println!("  records written: {}", report.written);
    println!("  llm extractions: {}", report.llm_extractions);
    println!("  heuristic extractions: {}", report.heuristic_extractions);
    println!("  cache hits: {}", report.cache_hits);
    if report.duplicates_dropped > 0 {
        println!("  duplicates dropped: {}", report.duplicates_dropped);
    }
    println!("  by category:");
    for (category, count) in &report.by_category {
        println!("    {}: {}", category, count);
    }
    println!("  output: {}", report.output.display());
    println!("ok");
    Ok(())
}

/// Core of [`run_index`]. Returns `None` for dry runs.
pub async fn index_with_client(
    config: &Config,
    options: &IndexOptions,
    client: Option<Arc<dyn CompletionClient>>,
) -> Result<Option<IndexReport>> {
    let candidates = discover_readmes(&options.repo, &config.indexer.exclude_globs, options.limit)?;

    if options.dry_run {
        for c in &candidates {
            println!("{}", c.folder_path);
        }
        println!("Total README candidates: {}", candidates.len());
        return Ok(None);
    }

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| config.data.agents_path.clone());
    let workers = options.workers.unwrap_or(config.indexer.workers).max(1);
    let rate = options.rate_limit.unwrap_or(config.indexer.rate_limit);
    if !(rate.is_finite() && rate > 0.0) {
        bail!("rate limit must be a finite number > 0, got {}", rate);
    }
    let links = SourceLinks::new(
        options
            .source_repo_url
            .as_deref()
            .unwrap_or(&config.source.repo_url),
        options
            .source_branch
            .as_deref()
            .unwrap_or(&config.source.branch),
    );

    let extractor = client.map(|client| {
        LlmExtractor::new(
            client,
            Arc::new(TokenBucket::new(rate, config.indexer.burst)),
            config.llm.model.clone(),
            config.llm.max_tokens,
            config.indexer.max_readme_chars,
        )
    });

    let stars = if options.fetch_stars || config.indexer.fetch_stars {
        fetch_stars(config, &links).await
    } else {
        None
    };

    let reporter = options.progress.reporter();
    reporter.report(IndexProgressEvent::Discovered {
        total: candidates.len() as u64,
    });
    tracing::info!(
        "indexing {} READMEs with {} workers ({})",
        candidates.len(),
        workers,
        if extractor.is_some() { "llm" } else { "heuristic" }
    );

    let ctx = Arc::new(IndexContext {
        root: options.repo.clone(),
        links,
        extractor,
        cache: ExtractionCache::load(&config.data.cache_path),
        stars,
        reporter,
        done: AtomicU64::new(0),
        total: candidates.len() as u64,
        llm_calls: AtomicU64::new(0),
        heuristic_runs: AtomicU64::new(0),
        cache_hits: AtomicU64::new(0),
    });

    let discovered = candidates.len();
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    for (position, candidate) in candidates.into_iter().enumerate() {
        let ctx = Arc::clone(&ctx);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await?;
            process_one(ctx, candidate).await.map(|r| (position, r))
        });
    }

    let mut slots: Vec<Option<AgentRecord>> = vec![None; discovered];
    while let Some(joined) = tasks.join_next().await {
        let (position, record) = joined??;
        slots[position] = Some(record);
    }
    let mut records: Vec<AgentRecord> = slots.into_iter().flatten().collect();

    let duplicates_dropped = dedup_and_sort(&mut records);
    write_json_atomic(&output, &records)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    ctx.cache.save()?;

    let mut by_category = BTreeMap::new();
    for r in &records {
        *by_category.entry(r.category.as_str().to_string()).or_insert(0) += 1;
    }

    Ok(Some(IndexReport {
        discovered,
        written: records.len(),
        llm_extractions: ctx.llm_calls.load(Ordering::Relaxed),
        heuristic_extractions: ctx.heuristic_runs.load(Ordering::Relaxed),
        cache_hits: ctx.cache_hits.load(Ordering::Relaxed),
        duplicates_dropped,
        by_category,
        output,
    }))
}
