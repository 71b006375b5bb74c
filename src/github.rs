//! Source repository metadata: GitHub stars and git commit times.
//!
//! Both are best effort. Any failure (network, rate limit, missing `git`,
//! not a repository) yields `None` and the record simply lacks the field.

use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::ttl_cache::TtlCache;

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("agent-navigator-indexer/", env!("CARGO_PKG_VERSION"));

static GITHUB_REPO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://github\.com/([^/]+)/([^/]+?)(?:\.git)?/?$")
        .expect("github url pattern is valid")
});

/// Splits `https://github.com/owner/repo(.git)` into `(owner, repo)`.
pub fn parse_owner_repo(repo_url: &str) -> Option<(String, String)> {
    let caps = GITHUB_REPO_URL.captures(repo_url.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Star counts from the GitHub REST API, memoized through a [`TtlCache`].
pub struct StarsClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    cache: TtlCache<u64>,
}

impl StarsClient {
    pub fn new(token: Option<String>, cache: TtlCache<u64>) -> Result<Self> {
        Self::with_api_base(GITHUB_API, token, cache)
    }

    pub fn with_api_base(
        api_base: &str,
        token: Option<String>,
        cache: TtlCache<u64>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            cache,
        })
    }

    pub async fn stars(&self, owner: &str, repo: &str) -> Option<u64> {
        let key = format!("stars:{}/{}", owner, repo);
        if let Some(hit) = self.cache.get(&key) {
            return Some(hit);
        }
        match self.fetch(owner, repo).await {
            Ok(Some(stars)) => {
                self.cache.insert(key, stars);
                Some(stars)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("stars lookup for {}/{} failed: {}", owner, repo, e);
                None
            }
        }
    }

    async fn fetch(&self, owner: &str, repo: &str) -> Result<Option<u64>> {
        let url = format!("{}/repos/{}/{}", self.api_base, owner, repo);
        let mut req = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("GitHub API returned {}", status);
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body.get("stargazers_count").and_then(|v| v.as_u64()))
    }

    /// Persists the stars cache.
    pub fn flush(&self) -> Result<()> {
        self.cache.save()
    }
}

/// Unix seconds of the last commit touching `relpath`, via `git log`.
pub async fn git_last_modified(repo_root: &Path, relpath: &str) -> Option<i64> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .args(["log", "-1", "--format=%ct", "--", relpath])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}
