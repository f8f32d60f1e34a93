//! Relational store for feeds, items, runs and per-feed run errors.
//!
//! [`Database`] owns the pool and offers self-contained operations. The
//! `feeds`, `items` and `runs` submodules additionally expose functions
//! taking a `&mut SqliteConnection`, so a pipeline phase can perform all
//! of its writes inside one session.

pub mod feeds;
pub mod items;
mod retention;
pub mod runs;
mod schema;
mod types;

pub use items::UpsertOutcome;
pub use retention::{CleanupReport, RetentionPolicy, RetentionSweeper};
pub use schema::Database;
pub use types::{
    ConditionalHeaders, DatabaseError, ErrorKind, Feed, FeedRegistration, FeedRunError, Item,
    NewFeedRunError, ParsedItem, RecentItem, Run, RunStatus, RunTotals,
};
