//! # Agent Navigator
//!
//! A searchable catalog of LLM agent example projects.
//!
//! Agent Navigator walks a checkout of an examples repository, turns every
//! project README into a structured [`AgentRecord`](agent_navigator_core::models::AgentRecord)
//! (with an LLM when available, keyword heuristics otherwise), and serves the
//! resulting catalog through a BM25 search engine, a CLI and a JSON HTTP API
//! with an optional LLM-backed recommender.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Discovery  │──▶│  Extraction   │──▶│ agents.json │
//! │  READMEs    │   │ LLM/heuristic │   │  (+SQLite)  │
//! └─────────────┘   └──────────────┘   └──────┬──────┘
//!                                             │
//!                        ┌────────────────────┤
//!                        ▼                    ▼
//!                  ┌───────────┐       ┌────────────┐
//!                  │    CLI    │       │    HTTP    │
//!                  │(agent-nav)│       │ + AI select│
//!                  └───────────┘       └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`discover`] | README discovery and folder inspection |
//! | [`extract`] | Heuristic metadata extraction |
//! | [`llm`] | Anthropic client and LLM extraction |
//! | [`rate_limit`] | Token bucket and per-client limiter |
//! | [`ingest`] | Parallel indexer |
//! | [`progress`] | Indexer progress reporting |
//! | [`github`] | Star counts and git timestamps |
//! | [`ttl_cache`] | Persisted TTL cache |
//! | [`catalog`] | Catalog load/write and backend selection |
//! | [`db`] / [`migrate`] / [`sqlite_store`] | SQLite FTS5 backend |
//! | [`search`] / [`get`] / [`stats`] | CLI commands |
//! | [`ai_select`] / [`budget`] | AI selector with cache and daily budget |
//! | [`server`] | HTTP API |

pub mod ai_select;
pub mod budget;
pub mod catalog;
pub mod config;
pub mod db;
pub mod discover;
pub mod extract;
pub mod get;
pub mod github;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod rate_limit;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod ttl_cache;
