//! HTTP plumbing shared by the sources
//!
//! This module handles:
//! - Building the HTTP client with the crawler's user agent
//! - Pacing successive requests within one fetch
//! - Backing off and retrying on HTTP 429

use crate::config::{HttpConfig, UserAgentConfig};
use crate::sources::FetchError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio::time::Instant;

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use sharebib_crawl::config::{HttpConfig, UserAgentConfig};
/// use sharebib_crawl::sources::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default(), &HttpConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    http: &HttpConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_secs(http.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Enforces a minimum interval between successive requests
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    last_request: Option<Instant>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: None,
        }
    }

    /// Time left before the next request may be sent, if any
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request?;
        let elapsed = now.duration_since(last);
        if elapsed < self.interval {
            Some(self.interval - elapsed)
        } else {
            None
        }
    }

    /// Waits out the interval, then records a request
    pub async fn wait(&mut self) {
        if let Some(delay) = self.time_until_next_request(Instant::now()) {
            tokio::time::sleep(delay).await;
        }
        self.last_request = Some(Instant::now());
    }
}

/// How a source reacts to HTTP 429
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Consecutive 429 responses tolerated before giving up
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Sends a GET built by `build`, pacing it and retrying on 429
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | HTTP 2xx | Return the response |
/// | HTTP 429 | Wait `policy.delay`, retry; fail after `policy.max_attempts` in a row |
/// | Other status | Fail with `FetchError::Status` |
/// | Network error | Fail with `FetchError::Request` |
pub async fn send_with_backoff<F>(
    build: F,
    url: &str,
    policy: &RetryPolicy,
    pacer: &mut RequestPacer,
) -> Result<Response, FetchError>
where
    F: Fn() -> RequestBuilder,
{
    let mut rate_limited = 0u32;

    loop {
        pacer.wait().await;

        let response = build().send().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            source: e,
        })?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            rate_limited += 1;
            if rate_limited >= policy.max_attempts {
                tracing::error!("Rate limit persisted after {} attempts: {}", rate_limited, url);
                return Err(FetchError::RateLimited {
                    url: url.to_string(),
                    attempts: rate_limited,
                });
            }
            tracing::warn!(
                "Rate limited by {}, waiting {:?} ({} retries left)",
                url,
                policy.delay,
                policy.max_attempts - rate_limited
            );
            tokio::time::sleep(policy.delay).await;
            continue;
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        return Ok(response);
    }
}

/// Reads a response body as text
pub async fn read_body(response: Response, url: &str) -> Result<String, FetchError> {
    response.text().await.map_err(|e| FetchError::Request {
        url: url.to_string(),
        source: e,
    })
}
