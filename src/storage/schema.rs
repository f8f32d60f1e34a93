use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the relational store shared by the item store, the run
/// bookkeeping and the retention sweeper. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// The file is created if it does not exist. `":memory:"` opens an
    /// in-memory database shared by every connection of the pool.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Other` if the database cannot be opened and
    /// `DatabaseError::Migration` if the schema cannot be applied.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: with `BEGIN IMMEDIATE` (see `begin`), an
        // overlapping scheduler invocation waits for the other run's write lock.
        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        // Small pool: one writer session per phase plus the odd reader.
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(db)
    }

    /// Begin a write transaction on a pooled connection.
    ///
    /// Uses `BEGIN IMMEDIATE` so the write lock is taken up front and waits
    /// on the busy handler. A deferred `BEGIN` that reads first gets
    /// `SQLITE_BUSY` without waiting when it later needs to write while
    /// another connection holds the lock.
    ///
    /// Each pipeline phase owns one of these; nothing holds a transaction
    /// across the network fetch phase.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, DatabaseError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op. `rate_limits` belongs to the request layer and is
    /// not created here.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                category_default TEXT,
                language TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                etag TEXT,
                last_modified TEXT,
                last_fetched_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                summary TEXT,
                url TEXT NOT NULL,
                published_at INTEGER,
                category TEXT,
                fetched_at INTEGER NOT NULL,
                UNIQUE(feed_id, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                status TEXT NOT NULL,
                total_feeds INTEGER NOT NULL DEFAULT 0,
                feeds_succeeded INTEGER NOT NULL DEFAULT 0,
                feeds_failed INTEGER NOT NULL DEFAULT 0,
                items_inserted INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_run_errors (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                error_type TEXT NOT NULL,
                error_message TEXT NOT NULL,
                http_status INTEGER,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_published ON items(published_at)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_feed ON items(feed_id)")
            .execute(&mut *tx)
            .await?;
        // Retention sweeps and the freshness view both filter on fetched_at
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_fetched ON items(fetched_at)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feed_run_errors_run ON feed_run_errors(run_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feed_run_errors_feed ON feed_run_errors(feed_id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_creates_schema() {
        let db = Database::open(":memory:").await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        assert_eq!(names, vec!["feed_run_errors", "feeds", "items", "runs"]);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.db");
        let path = path.to_str().unwrap();

        let db = Database::open(path).await.unwrap();
        db.close().await;

        // Reopening runs the migrations again against existing tables
        let db = Database::open(path).await.unwrap();
        db.close().await;
    }
}
