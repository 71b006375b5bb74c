//! A string-keyed cache with per-entry expiry, persisted as a JSON object.
//!
//! Used for GitHub API responses during indexing and for AI selector
//! replies in the server. Expired entries are dropped on load and ignored
//! on lookup. A cache file that fails to parse is discarded with a warning;
//! a cache is never worth failing a run over.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::catalog::write_json_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry<V> {
    value: V,
    /// Unix seconds at insertion.
    stored_at: i64,
}

pub struct TtlCache<V> {
    path: PathBuf,
    ttl_secs: i64,
    entries: Mutex<BTreeMap<String, Entry<V>>>,
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Loads `path` if present. Missing and corrupt files yield an empty cache.
    pub fn load(path: &Path, ttl_secs: u64) -> Self {
        Self::load_at(path, ttl_secs, now_secs())
    }

    fn load_at(path: &Path, ttl_secs: u64, now: i64) -> Self {
        let ttl_secs = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let mut entries: BTreeMap<String, Entry<V>> = BTreeMap::new();
        if path.exists() {
            match std::fs::read_to_string(path)
                .map_err(anyhow::Error::from)
                .and_then(|raw| {
                    serde_json::from_str::<BTreeMap<String, Entry<V>>>(&raw)
                        .map_err(anyhow::Error::from)
                })
            {
                Ok(loaded) => entries = loaded,
                Err(e) => {
                    tracing::warn!("discarding unreadable cache {}: {}", path.display(), e)
                }
            }
        }
        entries.retain(|_, e| now.saturating_sub(e.stored_at) < ttl_secs);
        Self {
            path: path.to_path_buf(),
            ttl_secs,
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, now_secs())
    }

    pub fn get_at(&self, key: &str, now: i64) -> Option<V> {
        let entries = self.lock();
        entries
            .get(key)
            .filter(|e| now.saturating_sub(e.stored_at) < self.ttl_secs)
            .map(|e| e.value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_at(key, value, now_secs());
    }

    pub fn insert_at(&self, key: impl Into<String>, value: V, now: i64) {
        self.lock().insert(
            key.into(),
            Entry {
                value,
                stored_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries and writes the rest to disk.
    pub fn save(&self) -> Result<()> {
        let now = now_secs();
        let snapshot = {
            let mut entries = self.lock();
            entries.retain(|_, e| now.saturating_sub(e.stored_at) < self.ttl_secs);
            entries.clone()
        };
        write_json_atomic(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn entries_expire_after_ttl() {
        let tmp = TempDir::new().unwrap();
        let cache: TtlCache<u64> = TtlCache::load(&tmp.path().join("c.json"), 60);
        cache.insert_at("stars:a/b", 42, 1_000);
        assert_eq!(cache.get_at("stars:a/b", 1_059), Some(42));
        assert_eq!(cache.get_at("stars:a/b", 1_060), None);
        assert_eq!(cache.get_at("missing", 1_000), None);
    }

    #[test]
    fn save_and_reload_keeps_fresh_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c.json");
        let cache: TtlCache<String> = TtlCache::load(&path, 3600);
        cache.insert("fresh", "yes".to_string());
        cache.insert_at("stale", "no".to_string(), 0);
        cache.save().unwrap();

        let reloaded: TtlCache<String> = TtlCache::load(&path, 3600);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("fresh").as_deref(), Some("yes"));
    }

    #[test]
    fn corrupt_file_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c.json");
        std::fs::write(&path, "not json at all").unwrap();
        let cache: TtlCache<u64> = TtlCache::load(&path, 10);
        assert!(cache.is_empty());
    }
}
