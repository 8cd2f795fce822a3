use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

use super::parser::parse_document;
use super::source::{FeedDocument, FeedSource};

/// Errors that can occur while retrieving a feed document.
///
/// Parse failures are not errors here; they come back as
/// [`FeedDocument::Malformed`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Limits applied to every feed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub timeout: Duration,
    /// Retries after the first attempt on 429, 5xx and truncated bodies.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub retry_base_delay: Duration,
    pub max_feed_size: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            max_feed_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Fetches feeds over HTTP(S) and parses them with `feed-rs`.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    settings: FetchSettings,
}

/// Limit redirects to 3 hops and refuse loops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(to = %attempt.url(), hops = attempt.previous().len(), "Following redirect");
        attempt.follow()
    })
}

impl HttpFeedSource {
    pub fn new(user_agent: &str, settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(create_redirect_policy())
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, settings })
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.settings
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(retry_count))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let max_retries = self.settings.max_retries;
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(self.settings.timeout, self.client.get(url).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();

            // Rate limiting: exponential backoff
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= max_retries {
                    return Err(FetchError::RateLimited(max_retries));
                }

                let delay = self.backoff(retry_count);
                tracing::warn!(
                    url = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }

                let delay = self.backoff(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx errors fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, self.settings.max_feed_size).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }

                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        url = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<FeedDocument, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        tracing::debug!(url = %url, bytes = bytes.len(), "Fetched feed");
        Ok(parse_document(&bytes))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
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

    // Fewer bytes than Content-Length means the connection dropped mid-body
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
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test</title>
    <item><title>Item</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn test_source() -> HttpFeedSource {
        HttpFeedSource::new(
            "feedreader-test",
            FetchSettings {
                retry_base_delay: Duration::from_millis(1),
                ..FetchSettings::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        match test_source().fetch(&url).await.unwrap() {
            FeedDocument::Parsed(feed) => {
                assert_eq!(feed.title.as_deref(), Some("Test"));
                assert_eq!(feed.entries.len(), 1);
            }
            other => panic!("Expected parsed feed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_404_error_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        match test_source().fetch(&url).await.unwrap_err() {
            FetchError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_error_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        match test_source().fetch(&url).await.unwrap_err() {
            FetchError::HttpStatus(500) => {}
            e => panic!("Expected HttpStatus(500), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_503_retry_then_success() {
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

        let url = format!("{}/feed", mock_server.uri());
        let document = test_source().fetch(&url).await.unwrap();
        assert!(matches!(document, FeedDocument::Parsed(_)));
    }

    #[tokio::test]
    async fn test_fetch_429_exhausts_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .expect(4)
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        match test_source().fetch(&url).await.unwrap_err() {
            FetchError::RateLimited(3) => {}
            e => panic!("Expected RateLimited(3), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let document = test_source().fetch(&url).await.unwrap();
        assert!(matches!(document, FeedDocument::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&mock_server)
            .await;

        let source = HttpFeedSource::new(
            "feedreader-test",
            FetchSettings {
                max_feed_size: 1024,
                ..FetchSettings::default()
            },
        )
        .unwrap();

        let url = format!("{}/feed", mock_server.uri());
        assert!(matches!(
            source.fetch(&url).await,
            Err(FetchError::ResponseTooLarge)
        ));
    }

    #[test]
    fn test_backoff_doubles() {
        let source = HttpFeedSource::new(
            "feedreader-test",
            FetchSettings {
                retry_base_delay: Duration::from_millis(100),
                ..FetchSettings::default()
            },
        )
        .unwrap();
        assert_eq!(source.backoff(0), Duration::from_millis(100));
        assert_eq!(source.backoff(1), Duration::from_millis(200));
        assert_eq!(source.backoff(2), Duration::from_millis(400));
    }
}
