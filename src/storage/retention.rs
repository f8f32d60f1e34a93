//! Retention sweeping: purges rows older than their configured horizon.
//!
//! Each category is deleted in its own statement so that one failing
//! category (for example `rate_limits` not existing yet) leaves the others
//! unaffected.

use serde::Serialize;

use super::schema::Database;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_DAY: i64 = 24 * 60 * SECS_PER_MINUTE;

/// Maximum row age per category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Items, by `fetched_at`
    pub items_days: i64,
    /// Runs, by `started_at`
    pub runs_days: i64,
    /// Feed run errors, by `created_at`
    pub errors_days: i64,
    /// Request-layer rate-limit counters, by `requested_at`
    pub rate_limit_minutes: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            items_days: 7,
            runs_days: 30,
            errors_days: 30,
            rate_limit_minutes: 60,
        }
    }
}

/// Rows removed by one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub items_deleted: u64,
    pub runs_deleted: u64,
    pub errors_deleted: u64,
    pub rate_limit_rows_deleted: u64,
    /// Categories whose delete statement failed
    pub failed: Vec<&'static str>,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.items_deleted + self.runs_deleted + self.errors_deleted + self.rate_limit_rows_deleted
    }
}

#[derive(Clone)]
pub struct RetentionSweeper {
    db: Database,
    policy: RetentionPolicy,
}

/// `now` minus a horizon, clamped so absurd horizons keep everything.
fn cutoff(now: i64, horizon: i64, unit_secs: i64) -> i64 {
    now.saturating_sub(horizon.saturating_mul(unit_secs))
}

impl RetentionSweeper {
    pub fn new(db: Database, policy: RetentionPolicy) -> Self {
        Self { db, policy }
    }

    pub async fn cleanup(&self) -> CleanupReport {
        self.cleanup_at(chrono::Utc::now().timestamp()).await
    }

    /// Sweep relative to `now` (Unix seconds).
    pub async fn cleanup_at(&self, now: i64) -> CleanupReport {
        let policy = &self.policy;
        let mut report = CleanupReport::default();

        if let Some(n) = self
            .delete_older_than(
                "items",
                "DELETE FROM items WHERE fetched_at < ?",
                cutoff(now, policy.items_days, SECS_PER_DAY),
            )
            .await
        {
            report.items_deleted = n;
        } else {
            report.failed.push("items");
        }

        // Errors go before runs; the FK cascade would otherwise hide their count
        if let Some(n) = self
            .delete_older_than(
                "feed_run_errors",
                "DELETE FROM feed_run_errors WHERE created_at < ?",
                cutoff(now, policy.errors_days, SECS_PER_DAY),
            )
            .await
        {
            report.errors_deleted = n;
        } else {
            report.failed.push("feed_run_errors");
        }

        if let Some(n) = self
            .delete_older_than(
                "runs",
                "DELETE FROM runs WHERE started_at < ?",
                cutoff(now, policy.runs_days, SECS_PER_DAY),
            )
            .await
        {
            report.runs_deleted = n;
        } else {
            report.failed.push("runs");
        }

        if let Some(n) = self
            .delete_older_than(
                "rate_limits",
                "DELETE FROM rate_limits WHERE requested_at < ?",
                cutoff(now, policy.rate_limit_minutes, SECS_PER_MINUTE),
            )
            .await
        {
            report.rate_limit_rows_deleted = n;
        } else {
            report.failed.push("rate_limits");
        }

        if report.total() > 0 {
            tracing::info!(
                items = report.items_deleted,
                runs = report.runs_deleted,
                errors = report.errors_deleted,
                rate_limits = report.rate_limit_rows_deleted,
                items_retention_days = policy.items_days,
                runs_retention_days = policy.runs_days,
                "Retention sweep deleted old rows"
            );
        } else {
            tracing::info!("Retention sweep found nothing to delete");
        }

        report
    }

    /// Returns `None` if the statement failed. A missing table counts as
    /// zero rows: the request layer may not have created `rate_limits` yet.
    async fn delete_older_than(&self, table: &'static str, sql: &str, cutoff: i64) -> Option<u64> {
        match sqlx::query(sql).bind(cutoff).execute(&self.db.pool).await {
            Ok(result) => Some(result.rows_affected()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("no such table") => {
                tracing::debug!(table = table, "Table does not exist, nothing to sweep");
                Some(0)
            }
            Err(e) => {
                tracing::warn!(table = table, error = %e, "Retention delete failed");
                None
            }
        }
    }
}
