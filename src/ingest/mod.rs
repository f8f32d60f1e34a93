//! The ingestion run: one invocation moves every enabled feed through
//! fetch, parse and upsert, records per-feed failures, finalizes the run
//! row and sweeps expired data.
//!
//! ```ignore
//! let client = feed::shared_client().await?.clone();
//! let summary = Ingestor::new(db, client, settings).run_ingest().await?;
//! println!("{} new items, status {}", summary.items_inserted, summary.status);
//! ```

mod dump;
mod pipeline;

pub use pipeline::{IngestError, Ingestor, RunSummary};
