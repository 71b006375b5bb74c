use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Variables that would otherwise leak host settings into the binary.
const ISOLATED_ENV: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_MODEL",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "AGENT_NAV_DATA_PATH",
    "AGENT_NAV_CACHE_PATH",
    "SEARCH_BACKEND",
    "SOURCE_REPO_URL",
    "SOURCE_BRANCH",
    "INDEXER_WORKERS",
    "INDEXER_RATE_LIMIT",
];

fn agent_nav_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("agent-nav");
    path
}

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
    repo: PathBuf,
    config_path: PathBuf,
}

impl TestEnv {
    fn agents_path(&self) -> PathBuf {
        self.root.join("data/agents.json")
    }
}

fn setup_test_env(backend: &str) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let repo = root.join("source");
    write(&repo, "README.md", "# Awesome examples\n\nTop-level index.\n");
    write(
        &repo,
        "rag_tutorials/pdf_chat/README.md",
        "# PDF Chat Bot\n\nChat with your PDF documents using LangChain retrieval and OpenAI.\n\n```bash\npip install -r requirements.txt\nstreamlit run app.py\n```\n",
    );
    write(&repo, "rag_tutorials/pdf_chat/app.py", "import streamlit\n");
    write(
        &repo,
        "voice_agents/speech_agent/README.md",
        "# Voice Agent\n\nTalk to it with speech to text powered by whisper.\n",
    );
    write(
        &repo,
        "chat_bots/slack_bot/README.md",
        "# Slack Bot\n\nA chatbot that answers questions inside Slack channels.\n",
    );
    write(&repo, "node_modules/pkg/README.md", "# Vendored\n");

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[data]
agents_path = "{root}/data/agents.json"
cache_path = "{root}/data/.indexer_cache.json"
http_cache_path = "{root}/data/.http_cache.json"

[source]
repo_url = "https://github.com/example/llm-apps"
branch = "main"

[indexer]
workers = 4

[search]
backend = "{backend}"
sqlite_path = "{root}/data/agents.sqlite"

[server]
bind = "127.0.0.1:7341"

[ai]
enabled = false
"#,
        root = root.display(),
        backend = backend,
    );
    let config_path = config_dir.join("agent-nav.toml");
    fs::write(&config_path, config_content).unwrap();

    TestEnv {
        _tmp: tmp,
        root,
        repo,
        config_path,
    }
}

fn run_agent_nav(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = agent_nav_binary();
    let mut cmd = Command::new(&binary);
    for key in ISOLATED_ENV {
        cmd.env_remove(key);
    }
    let output = cmd
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run agent-nav binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn index(env: &TestEnv) -> String {
    let (stdout, stderr, success) = run_agent_nav(
        &env.config_path,
        &[
            "index",
            "--repo",
            env.repo.to_str().unwrap(),
            "--no-llm",
            "--progress",
            "off",
        ],
    );
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn test_index_writes_catalog() {
    let env = setup_test_env("memory");
    let stdout = index(&env);
    assert!(stdout.contains("records written: 3"), "{}", stdout);
    assert!(stdout.contains("ok"));

    let raw = fs::read_to_string(env.agents_path()).unwrap();
    let records: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(records.len(), 3);
    let ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"rag_tutorials_pdf_chat"));
    assert!(!ids.iter().any(|id| id.contains("node_modules")));

    let pdf = records
        .iter()
        .find(|r| r["id"] == "rag_tutorials_pdf_chat")
        .unwrap();
    assert_eq!(
        pdf["github_url"],
        "https://github.com/example/llm-apps/tree/main/rag_tutorials/pdf_chat"
    );
    assert_eq!(pdf["category"], "rag");
}

#[test]
fn test_index_dry_run_writes_nothing() {
    let env = setup_test_env("memory");
    let (stdout, stderr, success) = run_agent_nav(
        &env.config_path,
        &["index", "--repo", env.repo.to_str().unwrap(), "--dry-run"],
    );
    assert!(success, "dry-run failed: {}", stderr);
    assert!(stdout.contains("rag_tutorials/pdf_chat"));
    assert!(stdout.contains("Total README candidates: 3"));
    assert!(!env.agents_path().exists());
}

#[test]
fn test_index_idempotent() {
    let env = setup_test_env("memory");
    index(&env);
    let first = fs::read(env.agents_path()).unwrap();

    let stdout = index(&env);
    assert!(stdout.contains("cache hits: 3"), "{}", stdout);
    let second = fs::read(env.agents_path()).unwrap();
    assert_eq!(first, second, "re-index changed the catalog");
}

#[test]
fn test_search_ranks_and_filters() {
    let env = setup_test_env("memory");
    index(&env);

    let (stdout, _, success) = run_agent_nav(&env.config_path, &["search", "slack"]);
    assert!(success);
    assert!(stdout.starts_with("1. ["), "{}", stdout);
    assert!(stdout.lines().next().unwrap().contains("Slack Bot"));

    let (stdout, _, success) =
        run_agent_nav(&env.config_path, &["search", "", "--category", "voice"]);
    assert!(success);
    assert!(stdout.contains("Voice Agent"));
    assert!(!stdout.contains("Slack Bot"));

    let (stdout, _, success) = run_agent_nav(&env.config_path, &["search", "xyz123"]);
    assert!(success);
    assert_eq!(stdout.trim(), "No results.");
}

#[test]
fn test_get_prints_json_and_fails_on_unknown() {
    let env = setup_test_env("memory");
    index(&env);

    let (stdout, _, success) =
        run_agent_nav(&env.config_path, &["get", "chat_bots_slack_bot"]);
    assert!(success);
    let record: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(record["name"], "Slack Bot");

    let (_, stderr, success) = run_agent_nav(&env.config_path, &["get", "does_not_exist"]);
    assert!(!success);
    assert!(stderr.contains("agent not found"), "{}", stderr);
}

#[test]
fn test_filters_and_stats() {
    let env = setup_test_env("memory");
    index(&env);

    let (stdout, _, success) = run_agent_nav(&env.config_path, &["filters"]);
    assert!(success);
    let categories = stdout.lines().find(|l| l.starts_with("categories:")).unwrap();
    assert!(categories.contains("rag"));
    assert!(categories.contains("voice"));

    let (stdout, _, success) = run_agent_nav(&env.config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Agents:      3"), "{}", stdout);
}

#[test]
fn test_missing_catalog_is_an_error() {
    let env = setup_test_env("memory");
    let (_, stderr, success) = run_agent_nav(&env.config_path, &["search", "bot"]);
    assert!(!success);
    assert!(stderr.contains("Agent catalog not found"), "{}", stderr);
}

#[test]
fn test_sqlite_backend_after_init_db() {
    let env = setup_test_env("sqlite");
    index(&env);

    let (stdout, stderr, success) = run_agent_nav(&env.config_path, &["init-db"]);
    assert!(success, "init-db failed: {}", stderr);
    assert!(stdout.contains("Imported 3 agents"), "{}", stdout);

    let (stdout, _, success) = run_agent_nav(&env.config_path, &["search", "slack"]);
    assert!(success);
    assert!(stdout.lines().next().unwrap().contains("Slack Bot"), "{}", stdout);

    let (stdout, _, success) =
        run_agent_nav(&env.config_path, &["get", "voice_agents_speech_agent"]);
    assert!(success);
    assert!(stdout.contains("\"Voice Agent\""));
}
