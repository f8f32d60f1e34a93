use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::{Connection, SqliteConnection};
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

use super::dump::dump_body;
use crate::config::Settings;
use crate::feed::{
    fetch, parse_feed, FeedConfig, FeedRegistry, FetchError, FetchPolicy, FetchedFeed,
    RegistryError,
};
use crate::storage::{
    feeds, items, runs, ConditionalHeaders, Database, DatabaseError, ErrorKind, NewFeedRunError,
    RetentionSweeper, RunStatus, RunTotals,
};

/// Failures that abort a run. Everything feed-scoped is recorded instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        IngestError::Database(e.into())
    }
}

/// Result of one ingestion pass, as returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub items_inserted: u64,
    pub items_deleted: u64,
    pub feeds_succeeded: u64,
    pub feeds_failed: u64,
    pub total_feeds: u64,
    pub duration_ms: u64,
}

/// Per-feed outcome of the persist phase, logged once per feed
#[derive(Debug, Default)]
struct FeedReport {
    status: Option<u16>,
    bytes: usize,
    parsed_count: usize,
    kept_count: usize,
    inserted: usize,
    error_type: Option<ErrorKind>,
}

impl FeedReport {
    fn succeeded(&self) -> bool {
        self.error_type.is_none()
    }
}

/// Drives one ingestion run: prepare, fetch, persist, finalize, cleanup.
///
/// Only the network phase is concurrent. Database phases run on a single
/// session each, so no transaction is held open while waiting on feeds.
pub struct Ingestor {
    db: Database,
    client: reqwest::Client,
    settings: Settings,
}

impl Ingestor {
    pub fn new(db: Database, client: reqwest::Client, settings: Settings) -> Self {
        Self {
            db,
            client,
            settings,
        }
    }

    /// Load the registry from `settings.feeds_path` and run one pass.
    ///
    /// # Errors
    ///
    /// Only an unreadable or invalid registry, or a database failure while
    /// preparing or finalizing the run, is returned. Feed-level failures are
    /// recorded on the run and reflected in its `partial` status.
    pub async fn run_ingest(&self) -> Result<RunSummary, IngestError> {
        let registry = FeedRegistry::load(&self.settings.feeds_path)?;
        self.run_with_registry(&registry).await
    }

    pub async fn run_with_registry(
        &self,
        registry: &FeedRegistry,
    ) -> Result<RunSummary, IngestError> {
        let started = Instant::now();
        let enabled = registry.enabled_feeds();
        let policy = self.settings.fetch_policy(registry.defaults.timeout());
        let max_items = registry.defaults.max_items_per_feed;

        // ========== PREPARE ==========
        let mut tx = self.db.begin().await?;
        feeds::remove_unlisted_feeds(&mut tx, &registry.feed_ids()).await?;
        let run_id =
            runs::create_run(&mut tx, enabled.len() as i64, chrono::Utc::now().timestamp())
                .await?;

        let mut prepared: Vec<(&FeedConfig, ConditionalHeaders)> =
            Vec::with_capacity(enabled.len());
        for &feed in &enabled {
            feeds::upsert_feed_registration(&mut tx, &feed.registration(&registry.defaults))
                .await?;
            let validators = feeds::get_feed_conditional_headers(&mut tx, &feed.id).await?;
            prepared.push((feed, validators));
        }
        tx.commit().await?;

        let prepare_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            total_feeds = enabled.len(),
            timeout_ms = policy.timeout.as_millis() as u64,
            elapsed_ms = prepare_ms,
            "Prepare phase completed"
        );

        // ========== FETCH ==========
        let phase = Instant::now();
        let mut fetched = self.fetch_all(&prepared, &policy).await;
        tracing::info!(
            run_id = %run_id,
            elapsed_ms = phase.elapsed().as_millis() as u64,
            "Fetch phase completed"
        );

        // ========== PERSIST ==========
        let phase = Instant::now();
        let mut totals = RunTotals::default();
        let mut tx = self.db.begin().await?;
        for (feed, _) in &prepared {
            let result = fetched.remove(feed.id.as_str());
            let report = match persist_in_savepoint(
                &mut tx,
                &run_id,
                feed,
                result,
                max_items,
                self.settings.dump_dir.as_deref(),
            )
            .await
            {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(
                        run_id = %run_id,
                        feed_id = %feed.id,
                        error = %e,
                        "Failed to persist feed outcome, counting feed as failed"
                    );
                    totals.feeds_failed += 1;
                    continue;
                }
            };

            log_feed_report(feed, &report);
            if report.succeeded() {
                totals.feeds_succeeded += 1;
                totals.items_inserted += report.inserted as i64;
            } else {
                totals.feeds_failed += 1;
            }
        }
        tx.commit().await?;
        tracing::info!(
            run_id = %run_id,
            elapsed_ms = phase.elapsed().as_millis() as u64,
            "Persist phase completed"
        );

        // ========== FINALIZE ==========
        let status = if totals.feeds_failed == 0 {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        let mut tx = self.db.begin().await?;
        runs::finalize_run(&mut tx, &run_id, status, &totals, chrono::Utc::now().timestamp())
            .await?;
        tx.commit().await?;

        tracing::info!(
            run_id = %run_id,
            status = %status,
            feeds_succeeded = totals.feeds_succeeded,
            feeds_failed = totals.feeds_failed,
            items_inserted = totals.items_inserted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finalized"
        );

        // ========== CLEANUP ==========
        let phase = Instant::now();
        let cleanup = RetentionSweeper::new(self.db.clone(), self.settings.retention_policy())
            .cleanup()
            .await;
        if !cleanup.failed.is_empty() {
            tracing::warn!(
                run_id = %run_id,
                failed = ?cleanup.failed,
                "Retention sweep incomplete"
            );
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            cleanup_ms = phase.elapsed().as_millis() as u64,
            duration_ms = duration_ms,
            "Run completed including cleanup"
        );

        Ok(RunSummary {
            run_id,
            status,
            items_inserted: totals.items_inserted as u64,
            items_deleted: cleanup.items_deleted,
            feeds_succeeded: totals.feeds_succeeded as u64,
            feeds_failed: totals.feeds_failed as u64,
            total_feeds: enabled.len() as u64,
            duration_ms,
        })
    }

    /// Fetch every prepared feed with at most `max_workers` in flight.
    ///
    /// Results are keyed by feed id; a failing fetch never cancels the others.
    async fn fetch_all<'a>(
        &self,
        prepared: &'a [(&'a FeedConfig, ConditionalHeaders)],
        policy: &FetchPolicy,
    ) -> HashMap<&'a str, Result<FetchedFeed, FetchError>> {
        let client = &self.client;
        stream::iter(prepared.iter())
            .map(|(feed, validators)| async move {
                let result = fetch(client, &feed.url, policy, validators).await;
                (feed.id.as_str(), result)
            })
            .buffer_unordered(self.settings.max_workers.max(1))
            .collect()
            .await
    }
}

/// Persist one feed's outcome inside its own savepoint, so a database error
/// midway leaves none of that feed's writes behind.
async fn persist_in_savepoint(
    conn: &mut SqliteConnection,
    run_id: &str,
    feed: &FeedConfig,
    result: Option<Result<FetchedFeed, FetchError>>,
    max_items: usize,
    dump_dir: Option<&std::path::Path>,
) -> Result<FeedReport, DatabaseError> {
    let mut savepoint = conn.begin().await?;
    let report = persist_feed(&mut savepoint, run_id, feed, result, max_items, dump_dir).await?;
    savepoint.commit().await?;
    Ok(report)
}

async fn persist_feed(
    conn: &mut SqliteConnection,
    run_id: &str,
    feed: &FeedConfig,
    result: Option<Result<FetchedFeed, FetchError>>,
    max_items: usize,
    dump_dir: Option<&std::path::Path>,
) -> Result<FeedReport, DatabaseError> {
    let now = chrono::Utc::now().timestamp();

    let fetched = match result {
        Some(Ok(fetched)) => fetched,
        Some(Err(e)) => {
            let message = e.to_string();
            record_error(conn, run_id, &feed.id, e.kind(), &message, e.http_status(), now).await?;
            return Ok(FeedReport {
                status: e.http_status(),
                error_type: Some(e.kind()),
                ..FeedReport::default()
            });
        }
        None => {
            record_error(conn, run_id, &feed.id, ErrorKind::HttpError, "No fetch result", None, now)
                .await?;
            return Ok(FeedReport {
                error_type: Some(ErrorKind::HttpError),
                ..FeedReport::default()
            });
        }
    };

    let mut report = FeedReport {
        status: Some(fetched.status),
        bytes: fetched.body.len(),
        ..FeedReport::default()
    };

    if fetched.is_not_modified() {
        feeds::touch_feed_fetched(conn, &feed.id, now).await?;
        return Ok(report);
    }

    if !fetched.is_ok() {
        let message = format!("HTTP {}", fetched.status);
        record_error(
            conn,
            run_id,
            &feed.id,
            ErrorKind::HttpError,
            &message,
            Some(fetched.status),
            now,
        )
        .await?;
        report.error_type = Some(ErrorKind::HttpError);
        return Ok(report);
    }

    match parse_feed(&fetched.body) {
        Ok(parsed) => {
            report.parsed_count = parsed.total();
            if parsed.total() == 0 {
                if let Some(dir) = dump_dir {
                    dump_body(dir, &feed.id, &fetched.body);
                }
            }

            let outcome = items::upsert_items(conn, &feed.id, &parsed.items, max_items, now).await;
            report.kept_count = outcome.kept();
            report.inserted = outcome.inserted;

            feeds::set_feed_conditional_headers(conn, &feed.id, &fetched.validators, now).await?;
        }
        Err(e) => {
            if let Some(dir) = dump_dir {
                dump_body(dir, &feed.id, &fetched.body);
            }
            let message = e.to_string();
            record_error(
                conn,
                run_id,
                &feed.id,
                ErrorKind::ParseError,
                &message,
                Some(fetched.status),
                now,
            )
            .await?;
            report.error_type = Some(ErrorKind::ParseError);
        }
    }

    Ok(report)
}

async fn record_error(
    conn: &mut SqliteConnection,
    run_id: &str,
    feed_id: &str,
    kind: ErrorKind,
    message: &str,
    http_status: Option<u16>,
    now: i64,
) -> Result<(), DatabaseError> {
    tracing::warn!(
        run_id = %run_id,
        feed_id = %feed_id,
        error_type = %kind,
        error = %message,
        "Feed failed"
    );
    runs::record_feed_error(
        conn,
        &NewFeedRunError {
            run_id,
            feed_id,
            kind,
            message,
            http_status,
        },
        now,
    )
    .await
}

fn log_feed_report(feed: &FeedConfig, report: &FeedReport) {
    tracing::info!(
        feed_name = %feed.name,
        url = %feed.url,
        status = ?report.status,
        bytes = report.bytes,
        parsed_count = report.parsed_count,
        kept_count = report.kept_count,
        inserted = report.inserted,
        error_type = report.error_type.map(|k| k.as_str()),
        "Feed processed"
    );
}
