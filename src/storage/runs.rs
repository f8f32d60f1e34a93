use sqlx::SqliteConnection;
use uuid::Uuid;

use super::schema::Database;
use super::types::{
    DatabaseError, FeedRunError, FeedRunErrorDbRow, NewFeedRunError, Run, RunDbRow, RunStatus,
    RunTotals,
};

// ============================================================================
// Session Operations
// ============================================================================

/// Open a new run record in the `running` state and return its id.
pub async fn create_run(
    conn: &mut SqliteConnection,
    total_feeds: i64,
    now: i64,
) -> Result<String, DatabaseError> {
    let run_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO runs (id, started_at, status, total_feeds) VALUES (?, ?, ?, ?)",
    )
    .bind(&run_id)
    .bind(now)
    .bind(RunStatus::Running.as_str())
    .bind(total_feeds)
    .execute(&mut *conn)
    .await?;
    Ok(run_id)
}

/// Append one per-feed failure to the run's error log.
pub async fn record_feed_error(
    conn: &mut SqliteConnection,
    error: &NewFeedRunError<'_>,
    now: i64,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO feed_run_errors
            (id, run_id, feed_id, error_type, error_message, http_status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(error.run_id)
    .bind(error.feed_id)
    .bind(error.kind.as_str())
    .bind(error.message)
    .bind(error.http_status.map(i64::from))
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Write the terminal status, finish time and counters of a run.
pub async fn finalize_run(
    conn: &mut SqliteConnection,
    run_id: &str,
    status: RunStatus,
    totals: &RunTotals,
    now: i64,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        UPDATE runs SET
            finished_at = ?,
            status = ?,
            feeds_succeeded = ?,
            feeds_failed = ?,
            items_inserted = ?
        WHERE id = ?
    "#,
    )
    .bind(now)
    .bind(status.as_str())
    .bind(totals.feeds_succeeded)
    .bind(totals.feeds_failed)
    .bind(totals.items_inserted)
    .bind(run_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ============================================================================
// Run Queries
// ============================================================================

impl Database {
    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>, DatabaseError> {
        let row = sqlx::query_as::<_, RunDbRow>(
            r#"
            SELECT id, started_at, finished_at, status, total_feeds,
                   feeds_succeeded, feeds_failed, items_inserted
            FROM runs
            WHERE id = ?
        "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RunDbRow::into_run).transpose()
    }

    /// Most recent runs first
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<Run>, DatabaseError> {
        let rows = sqlx::query_as::<_, RunDbRow>(
            r#"
            SELECT id, started_at, finished_at, status, total_feeds,
                   feeds_succeeded, feeds_failed, items_inserted
            FROM runs
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?
        "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RunDbRow::into_run).collect()
    }

    /// Errors recorded for a run, in the order they were written
    pub async fn errors_for_run(&self, run_id: &str) -> Result<Vec<FeedRunError>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedRunErrorDbRow>(
            r#"
            SELECT id, run_id, feed_id, error_type, error_message, http_status, created_at
            FROM feed_run_errors
            WHERE run_id = ?
            ORDER BY rowid
        "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FeedRunErrorDbRow::into_error).collect()
    }
}
