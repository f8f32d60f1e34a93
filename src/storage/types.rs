use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored enum column held a value this build does not know
    #[error("Unexpected value {value:?} in column {column}")]
    InvalidValue { column: &'static str, value: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

// ============================================================================
// Enumerations
// ============================================================================

/// Lifecycle state of an ingestion run.
///
/// A run is created as `Running` and finalized exactly once. There is no
/// hard-failure state: a run where every feed failed is still `Partial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            other => Err(DatabaseError::InvalidValue {
                column: "runs.status",
                value: other.to_string(),
            }),
        }
    }
}

/// Classification of a per-feed failure within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network read exceeded the per-feed deadline after retries
    Timeout,
    /// Non-2xx/304 final response, exhausted retry budget, or connection failure
    HttpError,
    /// Body retrieved but not interpretable as syndication content
    ParseError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::HttpError => "http_error",
            ErrorKind::ParseError => "parse_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(ErrorKind::Timeout),
            "http_error" => Ok(ErrorKind::HttpError),
            "parse_error" => Ok(ErrorKind::ParseError),
            other => Err(DatabaseError::InvalidValue {
                column: "feed_run_errors.error_type",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Input Types
// ============================================================================

/// Static feed fields written from the registry at the start of every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRegistration {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category_default: Option<String>,
    pub language: Option<String>,
    pub enabled: bool,
}

/// Represents a parsed item from a feed, before it is stored.
///
/// `title` and `link` are guaranteed non-empty by the parser; everything
/// else may be absent in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    /// Unix seconds
    pub published_at: Option<i64>,
}

/// Caching validators remembered from the last successful fetch
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct ConditionalHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Aggregate counters written when a run is finalized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub feeds_succeeded: i64,
    pub feeds_failed: i64,
    pub items_inserted: i64,
}

/// A failure to be appended to `feed_run_errors`
#[derive(Debug, Clone)]
pub struct NewFeedRunError<'a> {
    pub run_id: &'a str,
    pub feed_id: &'a str,
    pub kind: ErrorKind,
    pub message: &'a str,
    pub http_status: Option<u16>,
}

// ============================================================================
// Row Types
// ============================================================================

/// Row type for run queries; converted via `into_run()`
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunDbRow {
    pub id: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub total_feeds: i64,
    pub feeds_succeeded: i64,
    pub feeds_failed: i64,
    pub items_inserted: i64,
}

impl RunDbRow {
    pub(crate) fn into_run(self) -> Result<Run, DatabaseError> {
        Ok(Run {
            status: self.status.parse()?,
            id: self.id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            total_feeds: self.total_feeds,
            feeds_succeeded: self.feeds_succeeded,
            feeds_failed: self.feeds_failed,
            items_inserted: self.items_inserted,
        })
    }
}

/// Row type for feed_run_errors queries; converted via `into_error()`
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRunErrorDbRow {
    pub id: String,
    pub run_id: String,
    pub feed_id: String,
    pub error_type: String,
    pub error_message: String,
    pub http_status: Option<i64>,
    pub created_at: i64,
}

impl FeedRunErrorDbRow {
    pub(crate) fn into_error(self) -> Result<FeedRunError, DatabaseError> {
        Ok(FeedRunError {
            error_type: self.error_type.parse()?,
            id: self.id,
            run_id: self.run_id,
            feed_id: self.feed_id,
            error_message: self.error_message,
            http_status: self.http_status,
            created_at: self.created_at,
        })
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed row. Static fields come from the registry; `etag`, `last_modified`
/// and `last_fetched_at` are only written after fetch attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Feed {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category_default: Option<String>,
    pub language: Option<String>,
    pub enabled: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_fetched_at: Option<i64>,
}

/// Stored item. Unique on `(feed_id, url)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Item {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub url: String,
    pub published_at: Option<i64>,
    /// Last time this item was seen by a successful poll
    pub fetched_at: i64,
    pub category: Option<String>,
}

/// Item joined with its owning feed's display name (freshness view)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RecentItem {
    pub id: String,
    pub feed_id: String,
    pub feed_name: String,
    pub title: String,
    pub summary: Option<String>,
    pub url: String,
    pub published_at: Option<i64>,
    pub fetched_at: i64,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run {
    pub id: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: RunStatus,
    pub total_feeds: i64,
    pub feeds_succeeded: i64,
    pub feeds_failed: i64,
    pub items_inserted: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedRunError {
    pub id: String,
    pub run_id: String,
    pub feed_id: String,
    pub error_type: ErrorKind,
    pub error_message: String,
    pub http_status: Option<i64>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_round_trips_through_text() {
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Partial] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!(matches!(
            "failed".parse::<RunStatus>(),
            Err(DatabaseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_error_kind_text_matches_taxonomy() {
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
        assert_eq!(ErrorKind::HttpError.to_string(), "http_error");
        assert_eq!(ErrorKind::ParseError.to_string(), "parse_error");
        assert_eq!(
            serde_json::to_string(&ErrorKind::ParseError).unwrap(),
            "\"parse_error\""
        );
    }
}
