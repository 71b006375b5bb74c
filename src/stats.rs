//! Catalog statistics.
//!
//! Provides a quick summary of what's indexed: record counts per category
//! and complexity, plus the size and age of the catalog file. Used by
//! `agent-nav stats` to confirm an index run produced what was expected.

use agent_navigator_core::models::{AgentRecord, Vocabulary};
use anyhow::Result;
use std::collections::BTreeMap;

use crate::catalog::load_agents;
use crate::config::Config;

/// Counts per category and per complexity, most frequent first.
#[derive(Debug, Default, PartialEq)]
pub struct CatalogStats {
    pub total: usize,
    pub by_category: Vec<(String, usize)>,
    pub by_complexity: Vec<(String, usize)>,
    pub local_capable: usize,
    pub with_stars: usize,
}

fn ranked(counts: BTreeMap<&'static str, usize>) -> Vec<(String, usize)> {
    let mut out: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

pub fn compute_stats(records: &[AgentRecord]) -> CatalogStats {
    let mut categories = BTreeMap::new();
    let mut complexities = BTreeMap::new();
    for r in records {
        *categories.entry(r.category.as_str()).or_insert(0) += 1;
        *complexities.entry(r.complexity.as_str()).or_insert(0) += 1;
    }
    CatalogStats {
        total: records.len(),
        by_category: ranked(categories),
        by_complexity: ranked(complexities),
        local_capable: records.iter().filter(|r| r.supports_local_models).count(),
        with_stars: records.iter().filter(|r| r.stars.is_some()).count(),
    }
}

/// Run the stats command: load the catalog and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let path = &config.data.agents_path;
    let records = load_agents(path)?;
    let stats = compute_stats(&records);

    let meta = std::fs::metadata(path).ok();
    let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
    let modified = meta
        .and_then(|m| m.modified().ok())
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp());

    println!("Agent Navigator — Catalog Stats");
    println!("===============================");
    println!();
    println!("  Catalog:     {}", path.display());
    println!("  Size:        {}", format_bytes(size));
    println!(
        "  Modified:    {}",
        modified
            .map(format_ts_relative)
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!();
    println!("  Agents:      {}", stats.total);
    println!("  Local-ready: {}", stats.local_capable);
    println!("  With stars:  {}", stats.with_stars);

    for (title, rows) in [
        ("By category:", &stats.by_category),
        ("By complexity:", &stats.by_complexity),
    ] {
        if rows.is_empty() {
            continue;
        }
        println!();
        println!("  {}", title);
        for (label, count) in rows {
            println!("  {:<24} {:>6}", label, count);
        }
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
