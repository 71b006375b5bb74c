//! # Agent Navigator Core
//!
//! Shared, I/O-free logic for Agent Navigator: the catalog data model with
//! its closed vocabularies, the tokenizer, the BM25 ranking model, field
//! filters, the LRU result cache, the search engine and the search backend
//! trait.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem code.

pub mod bm25;
pub mod cache;
pub mod filters;
pub mod models;
pub mod search;
pub mod store;
pub mod tokenize;
