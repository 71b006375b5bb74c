//! # Agent Navigator CLI (`agent-nav`)
//!
//! The `agent-nav` binary indexes a repository of example LLM projects into a
//! searchable catalog, queries it from the terminal, and serves it over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! agent-nav --config ./config/agent-nav.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `agent-nav index` | Build `agents.json` from a source checkout |
//! | `agent-nav search "<query>"` | Ranked, filtered search |
//! | `agent-nav get <id>` | Print one record as JSON |
//! | `agent-nav filters` | List filter values present in the catalog |
//! | `agent-nav stats` | Catalog summary |
//! | `agent-nav init-db` | Import the catalog into SQLite FTS5 |
//! | `agent-nav serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Heuristic-only index of a local checkout
//! agent-nav index --repo ./awesome-llm-apps --no-llm
//!
//! # Search for local RAG examples
//! agent-nav search "pdf chat" --category rag --local-only
//!
//! # Start the API on the configured bind address
//! agent-nav serve
//! ```

use agent_navigator::config;
use agent_navigator::ingest::{self, IndexOptions};
use agent_navigator::progress::ProgressMode;
use agent_navigator::{get, search, server, sqlite_store, stats};
use agent_navigator_core::filters::{split_list, SearchFilters};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Agent Navigator CLI: index, search and serve a catalog of LLM example projects.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "agent-nav",
    about = "Agent Navigator: a searchable catalog of LLM agent example projects",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/agent-nav.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a source checkout into the agent catalog.
    ///
    /// Discovers every project README, extracts metadata with the LLM (or
    /// heuristics), and writes the catalog atomically. Unchanged READMEs are
    /// served from the extraction cache.
    Index {
        /// Root of the source checkout.
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Output file; defaults to `[data].agents_path`.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Heuristic extraction only.
        #[arg(long)]
        no_llm: bool,

        /// Concurrent extraction workers.
        #[arg(long)]
        workers: Option<usize>,

        /// LLM requests per second.
        #[arg(long)]
        rate_limit: Option<f64>,

        /// List what would be indexed and exit.
        #[arg(long)]
        dry_run: bool,

        /// Index at most N READMEs.
        #[arg(long)]
        limit: Option<usize>,

        /// Public repository URL used for links.
        #[arg(long)]
        source_repo_url: Option<String>,

        /// Branch used for links.
        #[arg(long)]
        source_branch: Option<String>,

        /// Look up the source repository's GitHub stars.
        #[arg(long)]
        fetch_stars: bool,

        /// Progress on stderr: `off`, `human` or `json`. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search the catalog.
    ///
    /// Filter flags accept comma-separated values.
    Search {
        /// Query text; empty lists the catalog.
        #[arg(default_value = "")]
        query: String,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        framework: Option<String>,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        complexity: Option<String>,

        /// Only projects that run against local models.
        #[arg(long)]
        local_only: bool,

        /// Maximum number of results to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print one record as pretty JSON.
    Get {
        /// Agent id, e.g. `rag_tutorials_pdf_chat`.
        id: String,
    },

    /// List the filter values present in the catalog.
    Filters,

    /// Print catalog statistics.
    Stats,

    /// Build the SQLite FTS5 database from the JSON catalog.
    InitDb {
        /// Catalog to import; defaults to `[data].agents_path`.
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Start the HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index {
            repo,
            output,
            no_llm,
            workers,
            rate_limit,
            dry_run,
            limit,
            source_repo_url,
            source_branch,
            fetch_stars,
            progress,
        } => {
            let options = IndexOptions {
                repo,
                output,
                no_llm,
                workers,
                rate_limit,
                dry_run,
                limit,
                source_repo_url,
                source_branch,
                fetch_stars,
                progress: ProgressMode::from_flag(progress.as_deref())?,
            };
            ingest::run_index(&cfg, &options).await?;
        }
        Commands::Search {
            query,
            category,
            framework,
            provider,
            complexity,
            local_only,
            limit,
        } => {
            let filters = SearchFilters {
                categories: split_list(category.as_deref()),
                frameworks: split_list(framework.as_deref()),
                providers: split_list(provider.as_deref()),
                complexities: split_list(complexity.as_deref()),
                local_only,
            };
            search::run_search(&cfg, &query, filters, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Filters => {
            search::run_filters(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::InitDb { from } => {
            sqlite_store::run_init_db(&cfg, from.as_deref()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
