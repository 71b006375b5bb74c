//! Catalog file I/O and backend selection.
//!
//! The catalog is a pretty-printed JSON array of
//! [`AgentRecord`]s. It is written atomically (temp file in the same
//! directory, then rename) so a crashed indexer never leaves a truncated
//! file behind for the server to choke on.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

use agent_navigator_core::models::AgentRecord;
use agent_navigator_core::search::AgentSearch;
use agent_navigator_core::store::SearchBackend;

use crate::config::Config;
use crate::sqlite_store::SqliteSearch;

/// Reads the catalog. A missing or unparseable file is an error.
pub fn load_agents(path: &Path) -> Result<Vec<AgentRecord>> {
    if !path.exists() {
        bail!(
            "Agent catalog not found: {}. Run `agent-nav index --repo <path>` first.",
            path.display()
        );
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read agent catalog: {}", path.display()))?;
    let agents: Vec<AgentRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Agent catalog is not valid JSON: {}", path.display()))?;
    Ok(agents)
}

/// Serializes `value` as pretty JSON and atomically replaces `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Opens the configured search backend over the catalog.
pub async fn open_backend(config: &Config) -> Result<Arc<dyn SearchBackend>> {
    match config.search.backend.as_str() {
        "memory" => {
            let agents = load_agents(&config.data.agents_path)?;
            let engine = AgentSearch::with_cache_capacity(agents, config.search.cache_size);
            tracing::info!(agents = engine.len(), "loaded catalog into memory");
            Ok(Arc::new(engine))
        }
        "sqlite" => {
            let store = SqliteSearch::open(config).await?;
            Ok(Arc::new(store))
        }
        other => bail!("Unknown search backend: '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_navigator_core::models::Category;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/agents.json");
        let mut a = AgentRecord::new("a", "Alpha");
        a.category = Category::Rag;
        let records = vec![a, AgentRecord::new("b", "Beta")];

        write_json_atomic(&path, &records).unwrap();
        assert_eq!(load_agents(&path).unwrap(), records);

        // Overwrite leaves no temp files behind.
        write_json_atomic(&path, &records[..1]).unwrap();
        assert_eq!(load_agents(&path).unwrap().len(), 1);
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn missing_and_corrupt_catalogs_are_errors() {
        let tmp = TempDir::new().unwrap();
        let missing = load_agents(&tmp.path().join("agents.json")).unwrap_err();
        assert!(missing.to_string().contains("not found"));

        let bad = tmp.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        let corrupt = load_agents(&bad).unwrap_err();
        assert!(corrupt.to_string().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn memory_backend_opens_catalog() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data.agents_path = tmp.path().join("agents.json");
        write_json_atomic(&config.data.agents_path, &vec![AgentRecord::new("x", "X")]).unwrap();

        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "memory");
        assert_eq!(backend.count().await.unwrap(), 1);
    }
}
