use chrono::{DateTime, NaiveDateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use thiserror::Error;

use crate::storage::ParsedItem;

/// The body was retrieved but is not usable syndication content
#[derive(Debug, Error)]
#[error("Feed could not be parsed: {0}")]
pub struct ParseError(#[from] feed_rs::parser::ParseFeedError);

/// Normalized entries of one feed body
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    /// Usable entries, in source order
    pub items: Vec<ParsedItem>,
    /// Entries dropped for lacking a title or link
    pub skipped: usize,
}

impl ParseResult {
    /// Number of entries the source contained
    pub fn total(&self) -> usize {
        self.items.len() + self.skipped
    }
}

/// Parse RSS 0.9x/1.0/2.0, Atom or JSON Feed bytes into candidate items.
///
/// An entry without a title or link is skipped on its own; a document the
/// parser cannot make sense of at all is a [`ParseError`].
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult, ParseError> {
    let feed = parser::Builder::new()
        .timestamp_parser(parse_timestamp)
        .build()
        .parse(bytes)?;

    let mut result = ParseResult::default();
    for entry in feed.entries {
        match normalize_entry(entry) {
            Some(item) => result.items.push(item),
            None => result.skipped += 1,
        }
    }
    Ok(result)
}

fn normalize_entry(entry: Entry) -> Option<ParsedItem> {
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())?;

    // Prefer the alternate (article) link over self/enclosure links
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())?;

    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .filter(|s| !s.trim().is_empty());

    let published_at = entry.published.or(entry.updated).map(|dt| dt.timestamp());

    Some(ParsedItem {
        title,
        link,
        summary,
        published_at,
    })
}

/// Date formats seen in the wild; anything else leaves the date unknown.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    // RFC 2822 with a named zone chrono does not know, e.g. "EST" or "CEST"
    if let Some((head, _zone)) = text.rsplit_once(' ') {
        for fmt in ["%a, %d %b %Y %H:%M:%S", "%d %b %Y %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(head, fmt) {
                return Some(naive.and_utc());
            }
        }
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }

    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Wire</title>
    <item>
      <title>First story</title>
      <link>https://wire.example.com/1</link>
      <description>Summary one</description>
      <pubDate>Tue, 10 Jun 2025 04:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
      <description>Dropped</description>
    </item>
    <item>
      <link>https://wire.example.com/untitled</link>
    </item>
    <item>
      <title>Second story</title>
      <link>https://wire.example.com/2</link>
      <pubDate>not a date</pubDate>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Wire</title>
  <id>urn:uuid:feed</id>
  <updated>2025-06-10T04:00:00Z</updated>
  <entry>
    <title>Atom story</title>
    <id>urn:uuid:1</id>
    <link rel="self" href="https://wire.example.com/api/1"/>
    <link rel="alternate" href="https://wire.example.com/1"/>
    <updated>2025-06-09T12:30:00Z</updated>
    <content type="html">Body text</content>
  </entry>
</feed>"#;

    #[test]
    fn test_rss_items_normalized_and_invalid_skipped() {
        let result = parse_feed(RSS.as_bytes()).unwrap();

        assert_eq!(result.total(), 4);
        assert_eq!(result.skipped, 2);
        assert_eq!(
            result.items,
            vec![
                ParsedItem {
                    title: "First story".to_string(),
                    link: "https://wire.example.com/1".to_string(),
                    summary: Some("Summary one".to_string()),
                    published_at: Some(1_749_528_000),
                },
                ParsedItem {
                    title: "Second story".to_string(),
                    link: "https://wire.example.com/2".to_string(),
                    summary: None,
                    published_at: None,
                },
            ]
        );
    }

    #[test]
    fn test_atom_prefers_alternate_link_and_falls_back_to_updated() {
        let result = parse_feed(ATOM.as_bytes()).unwrap();

        assert_eq!(result.items.len(), 1);
        let item = &result.items[0];
        assert_eq!(item.link, "https://wire.example.com/1");
        assert_eq!(item.summary.as_deref(), Some("Body text"));
        assert_eq!(item.published_at, Some(1_749_472_200));
    }

    #[test]
    fn test_empty_channel_is_not_an_error() {
        let rss = r#"<rss version="2.0"><channel><title>Empty</title></channel></rss>"#;
        let result = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(result.total(), 0);
    }

    #[test]
    fn test_non_feed_body_is_parse_error() {
        assert!(parse_feed(b"<html><body>Service unavailable</body></html>").is_err());
        assert!(parse_feed(b"this is not xml at all").is_err());
        assert!(parse_feed(b"").is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Some(1_749_528_000);
        let ts = |s: &str| parse_timestamp(s).map(|dt| dt.timestamp());

        assert_eq!(ts("Tue, 10 Jun 2025 04:00:00 GMT"), expected);
        assert_eq!(ts("Tue, 10 Jun 2025 00:00:00 -0400"), expected);
        assert_eq!(ts("2025-06-10T04:00:00Z"), expected);
        assert_eq!(ts("2025-06-10T04:00:00"), expected);
        assert_eq!(ts("2025-06-10 04:00:00"), expected);
        assert_eq!(ts("Tue, 10 Jun 2025 04:00:00 XYZ"), expected);
        assert_eq!(ts("2025-06-10"), Some(1_749_513_600));
        assert_eq!(ts("yesterday"), None);
    }

    proptest! {
        #[test]
        fn parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse_feed(&bytes);
        }

        #[test]
        fn kept_items_always_have_title_and_link(title in "[a-zA-Z ]{0,12}", link in "[a-z]{0,8}") {
            let rss = format!(
                r#"<rss version="2.0"><channel><item><title>{}</title><link>https://x.example.com/{}</link></item></channel></rss>"#,
                title, link
            );
            let result = parse_feed(rss.as_bytes()).unwrap();
            for item in &result.items {
                prop_assert!(!item.title.is_empty());
                prop_assert!(!item.link.is_empty());
            }
            prop_assert_eq!(result.total(), 1);
        }
    }
}
