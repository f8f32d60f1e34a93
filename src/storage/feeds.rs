use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{ConditionalHeaders, DatabaseError, Feed, FeedRegistration};

// ============================================================================
// Session Operations
// ============================================================================

/// Create or update a feed's static fields.
///
/// Conditional-fetch state (`etag`, `last_modified`, `last_fetched_at`) is
/// never touched here, so re-registering a feed every run is harmless.
pub async fn upsert_feed_registration(
    conn: &mut SqliteConnection,
    feed: &FeedRegistration,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO feeds (id, name, url, category_default, language, enabled)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            url = excluded.url,
            category_default = excluded.category_default,
            language = excluded.language,
            enabled = excluded.enabled
    "#,
    )
    .bind(&feed.id)
    .bind(&feed.name)
    .bind(&feed.url)
    .bind(&feed.category_default)
    .bind(&feed.language)
    .bind(feed.enabled)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete every feed whose id is not in `keep_ids`, along with its items
/// and error rows. Returns the removed ids.
pub async fn remove_unlisted_feeds(
    conn: &mut SqliteConnection,
    keep_ids: &[&str],
) -> Result<Vec<String>, DatabaseError> {
    let existing: Vec<(String,)> = sqlx::query_as("SELECT id FROM feeds ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    let mut removed = Vec::new();
    for (feed_id,) in existing {
        if keep_ids.contains(&feed_id.as_str()) {
            continue;
        }

        // Dependents first, whether or not foreign_keys is on
        sqlx::query("DELETE FROM items WHERE feed_id = ?")
            .bind(&feed_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM feed_run_errors WHERE feed_id = ?")
            .bind(&feed_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(&feed_id)
            .execute(&mut *conn)
            .await?;

        tracing::info!(feed_id = %feed_id, "Removed feed no longer present in configuration");
        removed.push(feed_id);
    }

    Ok(removed)
}

/// Stored caching validators for a feed. Unknown feeds yield empty headers.
pub async fn get_feed_conditional_headers(
    conn: &mut SqliteConnection,
    feed_id: &str,
) -> Result<ConditionalHeaders, DatabaseError> {
    let headers: Option<ConditionalHeaders> =
        sqlx::query_as("SELECT etag, last_modified FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(headers.unwrap_or_default())
}

/// Replace a feed's caching validators and advance `last_fetched_at`.
///
/// Validators absent from the latest response are cleared rather than kept,
/// so a server that stops sending them is not sent stale ones.
pub async fn set_feed_conditional_headers(
    conn: &mut SqliteConnection,
    feed_id: &str,
    headers: &ConditionalHeaders,
    now: i64,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE feeds SET etag = ?, last_modified = ?, last_fetched_at = ? WHERE id = ?",
    )
    .bind(&headers.etag)
    .bind(&headers.last_modified)
    .bind(now)
    .bind(feed_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Advance `last_fetched_at` only (the `304 Not Modified` path)
pub async fn touch_feed_fetched(
    conn: &mut SqliteConnection,
    feed_id: &str,
    now: i64,
) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE feeds SET last_fetched_at = ? WHERE id = ?")
        .bind(now)
        .bind(feed_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ============================================================================
// Feed Operations
// ============================================================================

impl Database {
    /// Register a single feed outside of a run
    pub async fn upsert_feed_registration(
        &self,
        feed: &FeedRegistration,
    ) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        upsert_feed_registration(&mut conn, feed).await
    }

    pub async fn get_feed_conditional_headers(
        &self,
        feed_id: &str,
    ) -> Result<ConditionalHeaders, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        get_feed_conditional_headers(&mut conn, feed_id).await
    }

    pub async fn set_feed_conditional_headers(
        &self,
        feed_id: &str,
        headers: &ConditionalHeaders,
    ) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut conn = self.pool.acquire().await?;
        set_feed_conditional_headers(&mut conn, feed_id, headers, now).await
    }

    /// All feeds, ordered by id
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, name, url, category_default, language, enabled,
                   etag, last_modified, last_fetched_at
            FROM feeds
            ORDER BY id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: &str) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, name, url, category_default, language, enabled,
                   etag, last_modified, last_fetched_at
            FROM feeds
            WHERE id = ?
        "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }
}
