use sha2::{Digest, Sha256};
use sqlx::{Connection, SqliteConnection};

use super::schema::Database;
use super::types::{DatabaseError, Item, ParsedItem, RecentItem};

/// Maximum number of items to return from any single query
const MAX_ITEMS: i64 = 2000;

/// Counts from one batch of item writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// New `(feed_id, url)` rows
    pub inserted: usize,
    /// Existing rows whose `fetched_at` was advanced
    pub refreshed: usize,
    /// Writes that failed and were skipped
    pub failed: usize,
}

impl UpsertOutcome {
    /// Items confirmed present in the store after this batch
    pub fn kept(&self) -> usize {
        self.inserted + self.refreshed
    }
}

/// Stable item id derived from the deduplication key.
pub fn item_id(feed_id: &str, url: &str) -> String {
    let input = format!("{}\n{}", feed_id, url);
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

// ============================================================================
// Session Operations
// ============================================================================

/// Upsert up to `max_items` candidates for a feed, in source order.
///
/// Each candidate is written inside its own savepoint: a failing write is
/// logged, rolled back and skipped without affecting the rest of the batch
/// or the enclosing session.
pub async fn upsert_items(
    conn: &mut SqliteConnection,
    feed_id: &str,
    candidates: &[ParsedItem],
    max_items: usize,
    now: i64,
) -> UpsertOutcome {
    let mut outcome = UpsertOutcome::default();

    for item in candidates.iter().take(max_items) {
        match upsert_item(conn, feed_id, item, now).await {
            Ok(true) => outcome.inserted += 1,
            Ok(false) => outcome.refreshed += 1,
            Err(e) => {
                tracing::warn!(
                    feed_id = %feed_id,
                    url = %item.link,
                    error = %e,
                    "Failed to store item, skipping"
                );
                outcome.failed += 1;
            }
        }
    }

    tracing::debug!(
        feed_id = %feed_id,
        inserted = outcome.inserted,
        refreshed = outcome.refreshed,
        failed = outcome.failed,
        "Items upserted"
    );

    outcome
}

/// Insert-or-update one item keyed on `(feed_id, url)`.
///
/// Two-phase write: `INSERT ... ON CONFLICT DO NOTHING` reports whether a
/// row was created through its affected-row count; on conflict, an UPDATE
/// refreshes non-null fields and always advances `fetched_at`.
/// Returns `true` for a fresh insert.
async fn upsert_item(
    conn: &mut SqliteConnection,
    feed_id: &str,
    item: &ParsedItem,
    now: i64,
) -> Result<bool, DatabaseError> {
    let mut savepoint = conn.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO items (id, feed_id, title, summary, url, published_at, category, fetched_at)
        VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
        ON CONFLICT DO NOTHING
    "#,
    )
    .bind(item_id(feed_id, &item.link))
    .bind(feed_id)
    .bind(&item.title)
    .bind(&item.summary)
    .bind(&item.link)
    .bind(item.published_at)
    .bind(now)
    .execute(&mut *savepoint)
    .await?;

    let inserted = result.rows_affected() > 0;

    if !inserted {
        sqlx::query(
            r#"
            UPDATE items SET
                title = COALESCE(?, title),
                summary = COALESCE(?, summary),
                published_at = COALESCE(?, published_at),
                fetched_at = ?
            WHERE feed_id = ? AND url = ?
        "#,
        )
        .bind(&item.title)
        .bind(&item.summary)
        .bind(item.published_at)
        .bind(now)
        .bind(feed_id)
        .bind(&item.link)
        .execute(&mut *savepoint)
        .await?;
    }

    savepoint.commit().await?;
    Ok(inserted)
}

// ============================================================================
// Item Operations
// ============================================================================

impl Database {
    /// Upsert items for a feed in a transaction of their own.
    ///
    /// Returns the number of new rows; refreshed rows are not counted.
    pub async fn upsert_items(
        &self,
        feed_id: &str,
        candidates: &[ParsedItem],
        max_items: usize,
    ) -> Result<usize, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.begin().await?;
        let outcome = upsert_items(&mut tx, feed_id, candidates, max_items, now).await;
        tx.commit().await?;
        Ok(outcome.inserted)
    }

    /// Items of one feed in the order they were first stored
    pub async fn items_for_feed(&self, feed_id: &str) -> Result<Vec<Item>, DatabaseError> {
        let items = sqlx::query_as::<_, Item>(
            r#"
            SELECT id, feed_id, title, summary, url, published_at, fetched_at, category
            FROM items
            WHERE feed_id = ?
            ORDER BY rowid
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_ITEMS)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Items confirmed present by a poll in `[start, end)`, newest published first.
    ///
    /// Because re-fetching advances `fetched_at`, this is the "items seen as
    /// of the latest polls" view rather than "items first seen in the window".
    pub async fn items_fetched_between(
        &self,
        start: i64,
        end: i64,
        limit: i64,
    ) -> Result<Vec<RecentItem>, DatabaseError> {
        let items = sqlx::query_as::<_, RecentItem>(
            r#"
            SELECT i.id, i.feed_id, f.name AS feed_name, i.title, i.summary, i.url,
                   i.published_at, i.fetched_at, i.category
            FROM items i
            JOIN feeds f ON f.id = i.feed_id
            WHERE i.fetched_at >= ? AND i.fetched_at < ?
            ORDER BY i.published_at IS NULL, i.published_at DESC, i.fetched_at DESC
            LIMIT ?
        "#,
        )
        .bind(start)
        .bind(end)
        .bind(limit.clamp(0, MAX_ITEMS))
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn count_items(&self) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}
