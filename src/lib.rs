//! # fluxeli_ingest
//!
//! Ingests RSS/Atom feeds across categories and languages into a SQLite
//! `articles` table, deduplicated by URL, and prunes articles past the
//! retention window.
//!
//! ## Pipeline
//!
//! 1. **Configuration**: load the feed list into [`models::FeedSource`]s ([`config`])
//! 2. **Fetching**: retrieve each feed with header rotation, timeout and retry ([`fetcher`])
//! 3. **Parsing**: extract raw entries and normalize them into articles ([`parser`])
//! 4. **Storing**: insert-if-absent keyed on URL, then prune and report ([`store`], [`pipeline`])

pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod outputs;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod utils;
