//! Runtime settings parser for `ingest.toml`.
//!
//! The settings file is optional: a missing file yields `Settings::default()`.
//! Unknown keys are accepted by serde but logged as a warning, since they are
//! most likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchPolicy;
use crate::storage::RetentionPolicy;

pub const ENV_DATABASE_PATH: &str = "INGEST_DATABASE_PATH";
pub const ENV_DUMP_DIR: &str = "INGEST_DUMP_DIR";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Settings file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Settings
// ============================================================================

/// Runtime settings for the ingestion binary.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file, or `:memory:`.
    pub database_path: String,

    /// Feed registry (JSON).
    pub feeds_path: PathBuf,

    /// Upper bound on concurrent fetches.
    pub max_workers: usize,

    /// Ceiling on the per-attempt timeout; the registry's `timeoutSeconds`
    /// can only lower it.
    pub fetch_timeout_ceiling_secs: u64,

    /// Total attempts per feed, including the first.
    pub fetch_attempts: u32,

    /// Backoff before retry `n` is `backoff_base_ms * 2^n`.
    pub backoff_base_ms: u64,

    pub items_retention_days: i64,
    pub runs_retention_days: i64,
    pub errors_retention_days: i64,
    pub rate_limit_retention_minutes: i64,

    /// Where to write raw bodies of feeds that parse to nothing.
    pub dump_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "rss.db".to_string(),
            feeds_path: PathBuf::from("feeds.json"),
            max_workers: 6,
            fetch_timeout_ceiling_secs: 5,
            fetch_attempts: 3,
            backoff_base_ms: 1000,
            items_retention_days: 7,
            runs_retention_days: 30,
            errors_retention_days: 30,
            rate_limit_retention_minutes: 60,
            dump_dir: None,
        }
    }
}

impl Settings {
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 11] = [
        "database_path",
        "feeds_path",
        "max_workers",
        "fetch_timeout_ceiling_secs",
        "fetch_attempts",
        "backoff_base_ms",
        "items_retention_days",
        "runs_retention_days",
        "errors_retention_days",
        "rate_limit_retention_minutes",
        "dump_dir",
    ];

    /// Load settings from a TOML file, then apply environment overrides.
    ///
    /// - Missing or empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - File over 1 MiB → `Err(ConfigError::TooLarge)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = Self::load_file(path)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Settings file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in settings file, ignoring");
                }
            }
        }

        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Environment takes precedence over the file. Empty values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|v| !v.is_empty()) {
            self.database_path = path;
        }
        if let Some(dir) = lookup(ENV_DUMP_DIR).filter(|v| !v.is_empty()) {
            self.dump_dir = Some(PathBuf::from(dir));
        }
    }

    /// Per-feed fetch policy given the registry's default timeout.
    pub fn fetch_policy(&self, registry_timeout: Duration) -> FetchPolicy {
        FetchPolicy {
            timeout: registry_timeout.min(Duration::from_secs(self.fetch_timeout_ceiling_secs)),
            attempts: self.fetch_attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            items_days: self.items_retention_days,
            runs_days: self.runs_retention_days,
            errors_days: self.errors_retention_days,
            rate_limit_minutes: self.rate_limit_retention_minutes,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_file(&dir.path().join("ingest.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_whitespace_only_returns_default() {
        assert_eq!(Settings::from_toml("  \n \n").unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_settings_keep_defaults() {
        let settings = Settings::from_toml("max_workers = 2\ndump_dir = \"/tmp/dumps\"\n").unwrap();
        assert_eq!(settings.max_workers, 2);
        assert_eq!(settings.dump_dir, Some(PathBuf::from("/tmp/dumps")));
        assert_eq!(settings.fetch_attempts, 3);
        assert_eq!(settings.database_path, "rss.db");
    }

    #[test]
    fn test_invalid_toml_and_wrong_type_rejected() {
        assert!(matches!(
            Settings::from_toml("this is not [valid toml"),
            Err(ConfigError::Parse(_))
        ));
        assert!(Settings::from_toml("max_workers = \"six\"").is_err());
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let settings = Settings::from_toml("max_worker = 3\nfetch_attempts = 2\n").unwrap();
        assert_eq!(settings.max_workers, 6);
        assert_eq!(settings.fetch_attempts, 2);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(&path, "#".repeat(1_048_577)).unwrap();

        let err = Settings::load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let mut settings = Settings::from_toml("database_path = \"file.db\"").unwrap();
        settings.apply_overrides(|key| match key {
            ENV_DATABASE_PATH => Some("/data/env.db".to_string()),
            ENV_DUMP_DIR => Some(String::new()),
            _ => None,
        });
        assert_eq!(settings.database_path, "/data/env.db");
        assert_eq!(settings.dump_dir, None);
    }

    #[test]
    fn test_fetch_policy_uses_lower_timeout() {
        let settings = Settings::default();
        let policy = settings.fetch_policy(Duration::from_secs(10));
        assert_eq!(policy.timeout, Duration::from_secs(5));
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.backoff_base, Duration::from_secs(1));

        let policy = settings.fetch_policy(Duration::from_secs(2));
        assert_eq!(policy.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_retention_policy_mapping() {
        let settings = Settings::from_toml("items_retention_days = 3").unwrap();
        assert_eq!(
            settings.retention_policy(),
            RetentionPolicy {
                items_days: 3,
                ..RetentionPolicy::default()
            }
        );
    }
}
