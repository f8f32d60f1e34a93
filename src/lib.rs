//! Scheduled RSS ingestion into SQLite.
//!
//! - [`feed`] - registry, fetcher and parser
//! - [`storage`] - feeds, items, runs, errors and retention
//! - [`ingest`] - the run orchestrator tying them together
//! - [`config`] - runtime settings

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
