use reqwest::redirect::Policy;
use std::time::Duration;
use tokio::sync::OnceCell;

static CLIENT: OnceCell<reqwest::Client> = OnceCell::const_new();

/// Process-wide HTTP client, built on first use and reused afterwards.
///
/// Concurrent first callers wait on the same initialization.
pub async fn shared_client() -> Result<&'static reqwest::Client, reqwest::Error> {
    CLIENT.get_or_try_init(|| async { build_client() }).await
}

/// Build a client suitable for feed fetching.
///
/// Per-attempt timeouts are applied by the fetcher; the connect timeout here
/// only bounds DNS/TCP/TLS setup.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(Policy::limited(10))
        .connect_timeout(Duration::from_secs(5))
        .build()
}
