//! Feed acquisition: registry loading, HTTP fetching and parsing.
//!
//! - [`registry`] - the static `feeds.json` list of feeds and defaults
//! - [`fetcher`] - conditional GET with retry, backoff and a size cap
//! - [`parser`] - lenient RSS/Atom parsing into [`ParsedItem`](crate::storage::ParsedItem)s
//! - [`client`] - the lazily-built process-wide HTTP client
//!
//! None of these touch the database; the ingest pipeline wires them to storage.

pub mod client;
pub mod fetcher;
pub mod parser;
pub mod registry;

pub use client::shared_client;
pub use fetcher::{fetch, FetchError, FetchPolicy, FetchedFeed};
pub use parser::{parse_feed, ParseError, ParseResult};
pub use registry::{FeedConfig, FeedRegistry, RegistryDefaults, RegistryError};
