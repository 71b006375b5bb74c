//! Record retrieval by id for `agent-nav get`.

use agent_navigator_core::models::AgentRecord;
use anyhow::{bail, Result};

use crate::catalog::open_backend;
use crate::config::Config;

/// Looks up one record through the configured backend.
pub async fn get_agent(config: &Config, id: &str) -> Result<AgentRecord> {
    let backend = open_backend(config).await?;
    match backend.get(id).await? {
        Some(record) => Ok(record),
        None => bail!("agent not found: {}", id),
    }
}

/// CLI entry point: prints the record as pretty JSON, or exits 1.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let record = match get_agent(config, id).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
