//! Static feed registry loaded from `feeds.json`.
//!
//! ```json
//! {
//!   "defaults": { "timeoutSeconds": 10, "maxItemsPerFeed": 3, "enabled": true },
//!   "feeds": [
//!     { "id": "bbc_world", "name": "BBC World", "url": "https://feeds.bbci.co.uk/news/world/rss.xml",
//!       "category": "world", "language": "en" }
//!   ]
//! }
//! ```
//!
//! The registry is the source of truth for which feeds may exist; loading
//! it is all-or-nothing.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::storage::FeedRegistration;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read feed registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in feed registry: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Feed at position {0} has an empty id")]
    EmptyId(usize),

    #[error("Duplicate feed id: {0}")]
    DuplicateId(String),

    #[error("Feed {id} has an invalid URL: {reason}")]
    InvalidUrl { id: String, reason: String },
}

/// Values applied to every feed unless the feed overrides them
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryDefaults {
    pub timeout_seconds: u64,
    pub max_items_per_feed: usize,
    pub enabled: bool,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            max_items_per_feed: 3,
            enabled: true,
        }
    }
}

impl RegistryDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Falls back to `defaults.enabled` when absent
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl FeedConfig {
    pub fn is_enabled(&self, defaults: &RegistryDefaults) -> bool {
        self.enabled.unwrap_or(defaults.enabled)
    }

    pub fn registration(&self, defaults: &RegistryDefaults) -> FeedRegistration {
        FeedRegistration {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            category_default: self.category.clone(),
            language: self.language.clone(),
            enabled: self.is_enabled(defaults),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FeedRegistry {
    #[serde(default)]
    pub defaults: RegistryDefaults,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl FeedRegistry {
    /// Load and validate the registry file.
    ///
    /// # Errors
    ///
    /// A missing file, malformed JSON, an empty or duplicate id, or a
    /// non-HTTP(S) URL all fail the whole load.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_json(&content)?;
        tracing::debug!(
            path = %path.display(),
            feeds = registry.feeds.len(),
            "Loaded feed registry"
        );
        Ok(registry)
    }

    pub fn from_json(content: &str) -> Result<Self, RegistryError> {
        let registry: FeedRegistry = serde_json::from_str(content)?;
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for (position, feed) in self.feeds.iter().enumerate() {
            if feed.id.trim().is_empty() {
                return Err(RegistryError::EmptyId(position));
            }
            if !seen.insert(feed.id.as_str()) {
                return Err(RegistryError::DuplicateId(feed.id.clone()));
            }
            validate_feed_url(&feed.url).map_err(|reason| RegistryError::InvalidUrl {
                id: feed.id.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Enabled feeds in registry order
    pub fn enabled_feeds(&self) -> Vec<&FeedConfig> {
        self.feeds
            .iter()
            .filter(|f| f.is_enabled(&self.defaults))
            .collect()
    }

    /// Ids of every configured feed, enabled or not
    pub fn feed_ids(&self) -> Vec<&str> {
        self.feeds.iter().map(|f| f.id.as_str()).collect()
    }
}

/// Only `http` and `https` URLs with a host are fetchable.
fn validate_feed_url(url_str: &str) -> Result<Url, String> {
    let url = Url::parse(url_str).map_err(|e| e.to_string())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(format!("unsupported scheme {} (only http/https)", scheme)),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "defaults": { "timeoutSeconds": 8, "maxItemsPerFeed": 5, "enabled": true },
        "feeds": [
            { "id": "bbc", "name": "BBC", "url": "https://bbc.example.com/rss", "category": "world", "language": "en" },
            { "id": "wsj", "name": "WSJ", "url": "https://wsj.example.com/rss", "enabled": false },
            { "id": "npr", "name": "NPR", "url": "http://127.0.0.1:8080/npr.xml" }
        ]
    }"#;

    #[test]
    fn test_parse_full_registry() {
        let registry = FeedRegistry::from_json(SAMPLE).unwrap();
        assert_eq!(registry.defaults.timeout(), Duration::from_secs(8));
        assert_eq!(registry.defaults.max_items_per_feed, 5);
        assert_eq!(registry.feeds.len(), 3);
        assert_eq!(registry.feeds[0].category.as_deref(), Some("world"));
        assert_eq!(registry.feed_ids(), vec!["bbc", "wsj", "npr"]);
    }

    #[test]
    fn test_enabled_feeds_keep_registry_order() {
        let registry = FeedRegistry::from_json(SAMPLE).unwrap();
        let ids: Vec<&str> = registry
            .enabled_feeds()
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(ids, vec!["bbc", "npr"]);
    }

    #[test]
    fn test_default_enabled_false_applies_to_unspecified_feeds() {
        let json = r#"{
            "defaults": { "enabled": false },
            "feeds": [
                { "id": "a", "name": "A", "url": "https://a.example.com/rss" },
                { "id": "b", "name": "B", "url": "https://b.example.com/rss", "enabled": true }
            ]
        }"#;
        let registry = FeedRegistry::from_json(json).unwrap();
        assert_eq!(registry.enabled_feeds().len(), 1);
        assert_eq!(registry.defaults.max_items_per_feed, 3);
    }

    #[test]
    fn test_registration_carries_defaults() {
        let registry = FeedRegistry::from_json(SAMPLE).unwrap();
        let reg = registry.feeds[1].registration(&registry.defaults);
        assert_eq!(
            reg,
            FeedRegistration {
                id: "wsj".to_string(),
                name: "WSJ".to_string(),
                url: "https://wsj.example.com/rss".to_string(),
                category_default: None,
                language: None,
                enabled: false,
            }
        );
    }

    #[test]
    fn test_malformed_json_is_fatal() {
        let err = FeedRegistry::from_json("{ \"feeds\": [ ").unwrap_err();
        assert!(matches!(err, RegistryError::Parse(_)));
    }

    #[test]
    fn test_missing_name_is_fatal() {
        let json = r#"{ "feeds": [ { "id": "a", "url": "https://a.example.com/rss" } ] }"#;
        assert!(matches!(
            FeedRegistry::from_json(json),
            Err(RegistryError::Parse(_))
        ));
    }

    #[test]
    fn test_duplicate_and_empty_ids_rejected() {
        let dup = r#"{ "feeds": [
            { "id": "a", "name": "A", "url": "https://a.example.com/rss" },
            { "id": "a", "name": "A2", "url": "https://a2.example.com/rss" }
        ] }"#;
        assert!(matches!(
            FeedRegistry::from_json(dup),
            Err(RegistryError::DuplicateId(id)) if id == "a"
        ));

        let empty = r#"{ "feeds": [ { "id": " ", "name": "A", "url": "https://a.example.com/rss" } ] }"#;
        assert!(matches!(
            FeedRegistry::from_json(empty),
            Err(RegistryError::EmptyId(0))
        ));
    }

    #[test]
    fn test_non_http_url_rejected() {
        let json = r#"{ "feeds": [ { "id": "a", "name": "A", "url": "file:///etc/passwd" } ] }"#;
        assert!(matches!(
            FeedRegistry::from_json(json),
            Err(RegistryError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = FeedRegistry::load(&dir.path().join("feeds.json")).unwrap_err();
        assert!(matches!(err, RegistryError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let registry = FeedRegistry::load(&path).unwrap();
        assert_eq!(registry.feeds.len(), 3);
    }
}
