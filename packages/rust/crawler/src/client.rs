//! Rate-limited, robots-aware HTTP fetching with retries.

use std::fmt;
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use trendscout_shared::{FetchConfig, Result, RetryPolicy, TimeRange, TrendScoutError};

use crate::politeness::PolitenessChecker;
use crate::rate_limiter::RateLimiter;

/// Classification of a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    Transport,
    /// Non-success status other than 429.
    Status(u16),
    /// HTTP 429.
    RateLimited,
}

/// A failed attempt with its diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of [`FetchClient::fetch`]. Fetching never returns an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 2xx response body.
    Fetched(String),
    /// robots.txt refused the URL. No request was made.
    Denied,
    /// Every attempt failed.
    Exhausted { attempts: u32, last_error: FetchError },
}

impl FetchOutcome {
    /// The document body, if one was fetched.
    pub fn into_document(self) -> Option<String> {
        match self {
            Self::Fetched(body) => Some(body),
            Self::Denied | Self::Exhausted { .. } => None,
        }
    }
}

/// Build the listing page URL: `{base}/trending[/{language}]?since={range}`.
pub fn listing_url(base: &str, range: TimeRange, language: Option<&str>) -> String {
    let mut url = format!("{}/trending", base.trim_end_matches('/'));
    if let Some(lang) = language.map(str::trim).filter(|l| !l.is_empty()) {
        let slug = lang.to_lowercase().replace(' ', "-");
        url.push('/');
        url.extend(url::form_urlencoded::byte_serialize(slug.as_bytes()));
    }
    url.push_str("?since=");
    url.push_str(range.as_str());
    url
}

// ---------------------------------------------------------------------------
// FetchClient
// ---------------------------------------------------------------------------

/// HTTP client that gates every request through politeness, the shared
/// rate limiter, and a concurrency cap.
pub struct FetchClient {
    client: Client,
    limiter: Arc<RateLimiter>,
    politeness: Arc<PolitenessChecker>,
    permits: Semaphore,
    retry: RetryPolicy,
}

impl FetchClient {
    /// Build a client from runtime config, sharing `limiter` with other callers.
    pub fn new(config: &FetchConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| TrendScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        let robots_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.robots_timeout)
            .build()
            .map_err(|e| TrendScoutError::Network(format!("failed to build HTTP client: {e}")))?;
        let politeness = PolitenessChecker::new(
            robots_client,
            config.user_agent.clone(),
            config.respect_robots,
        );

        Ok(Self::with_parts(
            client,
            limiter,
            Arc::new(politeness),
            config.concurrency,
            config.retry,
        ))
    }

    /// Assemble a client from already-built parts.
    pub fn with_parts(
        client: Client,
        limiter: Arc<RateLimiter>,
        politeness: Arc<PolitenessChecker>,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            limiter,
            politeness,
            permits: Semaphore::new(concurrency.max(1)),
            retry,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetch `url` as text.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        if !self.politeness.can_fetch(url).await {
            info!(%url, "skipping fetch disallowed by robots.txt");
            return FetchOutcome::Denied;
        }
        let crawl_delay = self.politeness.crawl_delay(url).await;

        let mut attempts = 0u32;
        let result = self
            .retry
            .retry(
                |attempt| {
                    attempts = attempt + 1;
                    self.attempt(url, crawl_delay, attempt)
                },
                |_: &FetchError| true,
            )
            .await;

        match result {
            Ok(body) => FetchOutcome::Fetched(body),
            Err(last_error) => {
                warn!(%url, attempts, error = %last_error, "fetch failed after all attempts");
                FetchOutcome::Exhausted {
                    attempts,
                    last_error,
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        crawl_delay: Option<std::time::Duration>,
        attempt: u32,
    ) -> std::result::Result<String, FetchError> {
        self.limiter.wait_with_floor(crawl_delay).await;
        let _permit = self.permits.acquire().await.map_err(|e| FetchError {
            kind: FetchErrorKind::Transport,
            message: format!("fetch semaphore closed: {e}"),
        })?;

        debug!(%url, attempt = attempt + 1, "fetching");
        let result = self.request(url).await;
        match &result {
            Ok(_) => self.limiter.record_success(),
            Err(e) => {
                self.limiter
                    .record_error(e.kind == FetchErrorKind::RateLimited);
                warn!(%url, attempt = attempt + 1, error = %e, "fetch attempt failed");
            }
        }
        result
    }

    async fn request(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| FetchError {
            kind: if e.is_timeout() {
                FetchErrorKind::Timeout
            } else {
                FetchErrorKind::Transport
            },
            message: format!("{url}: {e}"),
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError {
                kind: FetchErrorKind::RateLimited,
                message: format!("{url}: HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(FetchError {
                kind: FetchErrorKind::Status(status.as_u16()),
                message: format!("{url}: HTTP {status}"),
            });
        }

        response.text().await.map_err(|e| FetchError {
            kind: if e.is_timeout() {
                FetchErrorKind::Timeout
            } else {
                FetchErrorKind::Transport
            },
            message: format!("{url}: body read failed: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use trendscout_shared::RateLimiterConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config(timeout: Duration) -> FetchConfig {
        FetchConfig {
            base_url: "http://unused".into(),
            user_agent: "TrendScout-Test/0.1".into(),
            concurrency: 2,
            retry: RetryPolicy::new(3, Duration::ZERO),
            timeout,
            robots_timeout: Duration::from_secs(2),
            respect_robots: true,
            limiter: RateLimiterConfig {
                initial_rate: 1_000.0,
                min_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(20),
            },
        }
    }

    fn client(config: &FetchConfig) -> FetchClient {
        let limiter = Arc::new(RateLimiter::new(config.limiter));
        FetchClient::new(config, limiter).unwrap()
    }

    async fn permissive_robots(server: &MockServer) {
        Mock::given(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    #[test]
    fn listing_url_shapes() {
        assert_eq!(
            listing_url("https://github.com/", TimeRange::Daily, None),
            "https://github.com/trending?since=daily"
        );
        assert_eq!(
            listing_url("https://github.com", TimeRange::Weekly, Some("Rust")),
            "https://github.com/trending/rust?since=weekly"
        );
        assert_eq!(
            listing_url("https://github.com", TimeRange::Monthly, Some("C++")),
            "https://github.com/trending/c%2B%2B?since=monthly"
        );
        assert_eq!(
            listing_url("https://github.com", TimeRange::Daily, Some("  ")),
            "https://github.com/trending?since=daily"
        );
    }

    #[tokio::test]
    async fn fetch_success() {
        let server = MockServer::start().await;
        permissive_robots(&server).await;
        Mock::given(method("GET"))
            .and(path("/trending"))
            .and(query_param("since", "daily"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(Duration::from_secs(5));
        let client = client(&config);
        let url = listing_url(&server.uri(), TimeRange::Daily, None);
        let outcome = client.fetch(&url).await;
        assert_eq!(outcome.into_document().as_deref(), Some("<html>ok</html>"));
        assert_eq!(client.limiter().stats().recent_successes, 1);
    }

    #[tokio::test]
    async fn retries_after_server_error() {
        let server = MockServer::start().await;
        permissive_robots(&server).await;
        Mock::given(path("/trending"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(path("/trending"))
            .respond_with(ResponseTemplate::new(200).set_body_string("second"))
            .mount(&server)
            .await;

        let config = test_config(Duration::from_secs(5));
        let client = client(&config);
        let outcome = client.fetch(&format!("{}/trending", server.uri())).await;
        assert_eq!(outcome, FetchOutcome::Fetched("second".into()));

        let stats = client.limiter().stats();
        assert_eq!(stats.recent_errors, 1);
        assert_eq!(stats.recent_successes, 1);
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let server = MockServer::start().await;
        permissive_robots(&server).await;
        Mock::given(path("/trending"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let config = test_config(Duration::from_secs(5));
        let outcome = client(&config)
            .fetch(&format!("{}/trending", server.uri()))
            .await;
        match outcome {
            FetchOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.kind, FetchErrorKind::Status(500));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn throttling_slows_limiter() {
        let server = MockServer::start().await;
        permissive_robots(&server).await;
        Mock::given(path("/trending"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(path("/trending"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let config = test_config(Duration::from_secs(5));
        let client = client(&config);
        let before = client.limiter().current_interval();
        let outcome = client.fetch(&format!("{}/trending", server.uri())).await;
        assert!(matches!(outcome, FetchOutcome::Fetched(_)));
        assert!(client.limiter().current_interval() > before);
    }

    #[tokio::test]
    async fn timeout_is_classified() {
        let server = MockServer::start().await;
        permissive_robots(&server).await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config = test_config(Duration::from_millis(100));
        let outcome = client(&config).fetch(&format!("{}/slow", server.uri())).await;
        match outcome {
            FetchOutcome::Exhausted { last_error, .. } => {
                assert_eq!(last_error.kind, FetchErrorKind::Timeout);
            }
            other => panic!("expected timeout exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn robots_denial_skips_request() {
        let server = MockServer::start().await;
        Mock::given(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /trending\n"),
            )
            .mount(&server)
            .await;
        Mock::given(path("/trending"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = test_config(Duration::from_secs(5));
        let outcome = client(&config)
            .fetch(&format!("{}/trending?since=daily", server.uri()))
            .await;
        assert_eq!(outcome, FetchOutcome::Denied);
        assert_eq!(outcome.into_document(), None);
    }
}
