use futures::StreamExt;
use reqwest::header::{
    HeaderMap, ACCEPT, ACCEPT_LANGUAGE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
    USER_AGENT,
};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::storage::{ConditionalHeaders, ErrorKind};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Statuses worth another attempt; every other 4xx is final.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

// Some publishers' CDNs refuse requests that do not look like a browser.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const FEED_ACCEPT: &str =
    "application/rss+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";
pub const FEED_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Errors that end a fetch after the retry budget is spent or on a
/// non-transient failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Retryable status still returned on the final attempt
    #[error("HTTP error: status {status} after {attempts} attempts")]
    HttpStatus { status: u16, attempts: u32 },
    /// Every attempt exceeded the per-attempt timeout
    #[error("Request timed out after {0} attempts")]
    Timeout(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// Category recorded in the run's error log
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::HttpError,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Retry and timeout settings for one feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Hard ceiling per attempt, covering connect, headers and body
    pub timeout: Duration,
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before retry `n` (0-based) is `backoff_base * 2^n`
    pub backoff_base: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl FetchPolicy {
    fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Final response of a fetch that was not turned into an error.
///
/// Non-retryable statuses (`304`, `404`, ...) are returned as-is; the caller
/// decides what they mean.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub status: u16,
    /// Empty unless the status is 2xx
    pub body: Vec<u8>,
    /// Validators sent by the server with this response
    pub validators: ConditionalHeaders,
}

impl FetchedFeed {
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED.as_u16()
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }
}

/// Conditional GET of a feed URL with retry and exponential backoff.
///
/// Holds no state besides its arguments, so any number of fetches may run
/// concurrently on the same client.
///
/// # Behavior
///
/// - Sends `If-None-Match` / `If-Modified-Since` when `validators` has them
/// - Sends browser-like `User-Agent`, `Accept` and `Accept-Language`
/// - Retries 429/500/502/503/504 and timeouts, up to `policy.attempts` total
/// - Returns other statuses immediately without retrying
///
/// # Errors
///
/// - [`FetchError::Timeout`] - every attempt timed out
/// - [`FetchError::HttpStatus`] - a retryable status persisted to the last attempt
/// - [`FetchError::Network`] - connection-level failure (not retried)
/// - [`FetchError::ResponseTooLarge`] / [`FetchError::IncompleteResponse`] - bad body
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    policy: &FetchPolicy,
    validators: &ConditionalHeaders,
) -> Result<FetchedFeed, FetchError> {
    let attempts = policy.attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        let is_last = attempt + 1 >= attempts;

        let outcome =
            match tokio::time::timeout(policy.timeout, send_once(client, url, policy, validators))
                .await
            {
                Ok(Err(FetchError::Network(e))) if e.is_timeout() => None,
                Ok(result) => Some(result?),
                Err(_) => None,
            };

        match outcome {
            None => {
                if is_last {
                    return Err(FetchError::Timeout(attempts));
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    feed = %url,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Fetch timed out, retrying after delay"
                );
                tokio::time::sleep(delay).await;
            }
            Some(fetched) if RETRYABLE_STATUSES.contains(&fetched.status) => {
                if is_last {
                    return Err(FetchError::HttpStatus {
                        status: fetched.status,
                        attempts,
                    });
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    feed = %url,
                    status = fetched.status,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient HTTP status, retrying after delay"
                );
                tokio::time::sleep(delay).await;
            }
            Some(fetched) => return Ok(fetched),
        }

        attempt += 1;
    }
}

async fn send_once(
    client: &reqwest::Client,
    url: &str,
    policy: &FetchPolicy,
    validators: &ConditionalHeaders,
) -> Result<FetchedFeed, FetchError> {
    let mut request = client
        .get(url)
        .timeout(policy.timeout)
        .header(USER_AGENT, BROWSER_USER_AGENT)
        .header(ACCEPT, FEED_ACCEPT)
        .header(ACCEPT_LANGUAGE, FEED_ACCEPT_LANGUAGE);
    if let Some(etag) = &validators.etag {
        request = request.header(IF_NONE_MATCH, etag);
    }
    if let Some(last_modified) = &validators.last_modified {
        request = request.header(IF_MODIFIED_SINCE, last_modified);
    }

    let response = request.send().await?;
    let status = response.status();
    let validators = response_validators(response.headers());

    let body = if status.is_success() {
        read_limited_bytes(response, MAX_FEED_SIZE).await?
    } else {
        Vec::new()
    };

    Ok(FetchedFeed {
        status: status.as_u16(),
        body,
        validators,
    })
}

fn response_validators(headers: &HeaderMap) -> ConditionalHeaders {
    let header = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    ConditionalHeaders {
        etag: header(ETAG),
        last_modified: header(LAST_MODIFIED),
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn fast_policy() -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_millis(300),
            attempts: 3,
            backoff_base: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = FetchPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_fetch_success_returns_body_and_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("User-Agent", BROWSER_USER_AGENT))
            .and(header("Accept-Language", FEED_ACCEPT_LANGUAGE))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        let fetched = fetch(&client, &url, &fast_policy(), &ConditionalHeaders::default())
            .await
            .unwrap();

        assert!(fetched.is_ok());
        assert_eq!(fetched.body, VALID_RSS.as_bytes());
        assert_eq!(fetched.validators.etag.as_deref(), Some("\"v1\""));
        assert_eq!(
            fetched.validators.last_modified.as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }

    #[tokio::test]
    async fn test_conditional_headers_sent_and_304_returned() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            .and(header("If-Modified-Since", "Wed, 21 Oct 2015 07:28:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let validators = ConditionalHeaders {
            etag: Some("\"v1\"".to_string()),
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
        };
        let client = reqwest::Client::new();
        let fetched = fetch(&client, &mock_server.uri(), &fast_policy(), &validators)
            .await
            .unwrap();

        assert!(fetched.is_not_modified());
        assert!(fetched.body.is_empty());
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let fetched = fetch(
            &client,
            &mock_server.uri(),
            &fast_policy(),
            &ConditionalHeaders::default(),
        )
        .await
        .unwrap();

        assert_eq!(fetched.status, 404);
    }

    #[tokio::test]
    async fn test_503_retry_then_success() {
        let mock_server = MockServer::start().await;

        // First two requests return 503, third succeeds
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let fetched = fetch(
            &client,
            &mock_server.uri(),
            &fast_policy(),
            &ConditionalHeaders::default(),
        )
        .await
        .unwrap();

        assert!(fetched.is_ok());
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_on_500() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch(
            &client,
            &mock_server.uri(),
            &fast_policy(),
            &ConditionalHeaders::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            FetchError::HttpStatus {
                status: 500,
                attempts: 3
            }
        ));
        assert_eq!(err.kind(), ErrorKind::HttpError);
        assert_eq!(err.http_status(), Some(500));
    }

    #[tokio::test]
    async fn test_429_is_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&mock_server)
            .await;

        let policy = FetchPolicy {
            attempts: 2,
            ..fast_policy()
        };
        let client = reqwest::Client::new();
        let err = fetch(&client, &mock_server.uri(), &policy, &ConditionalHeaders::default())
            .await
            .unwrap_err();

        assert_eq!(err.http_status(), Some(429));
    }

    #[tokio::test]
    async fn test_slow_server_times_out_with_timeout_kind() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let policy = FetchPolicy {
            timeout: Duration::from_millis(100),
            attempts: 2,
            backoff_base: Duration::from_millis(10),
        };
        let client = reqwest::Client::new();
        let err = fetch(&client, &mock_server.uri(), &policy, &ConditionalHeaders::default())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout(2)));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_error() {
        let client = reqwest::Client::new();
        let err = fetch(
            &client,
            "http://127.0.0.1:1/feed",
            &fast_policy(),
            &ConditionalHeaders::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::Network(_)));
        assert_eq!(err.kind(), ErrorKind::HttpError);
    }
}
