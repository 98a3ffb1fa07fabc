use crate::sources::{RetryPolicy, SourceMeta};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
///
/// Every section is optional; a missing section takes its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub http: HttpConfig,
    pub sources: SourcesConfig,
}

/// Polling loop configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between sweeps for due tasks
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
        }
    }
}

/// Database location
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./sharebib.db"),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: Option<String>,
}

impl UserAgentConfig {
    /// Format: `CrawlerName/Version` or `CrawlerName/Version (mailto:email)`
    pub fn header_value(&self) -> String {
        match &self.contact_email {
            Some(email) => format!(
                "{}/{} (mailto:{})",
                self.crawler_name, self.crawler_version, email
            ),
            None => format!("{}/{}", self.crawler_name, self.crawler_version),
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "sharebib-crawl".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_email: None,
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Per-source HTTP settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    #[serde(rename = "arxiv-rss")]
    pub arxiv_rss: SourceHttpConfig,

    #[serde(rename = "semantic-scholar")]
    pub semantic_scholar: SourceHttpConfig,
}

/// HTTP settings of one source
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceHttpConfig {
    /// Overrides the source's public endpoint
    #[serde(rename = "base-url")]
    pub base_url: Option<String>,

    /// Overrides the source's declared minimum request interval (milliseconds)
    #[serde(rename = "request-interval-ms")]
    pub request_interval_ms: Option<u64>,

    /// Wait after an HTTP 429 before retrying (milliseconds)
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Consecutive HTTP 429 responses tolerated before the fetch fails
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
}

impl SourceHttpConfig {
    pub fn request_interval(&self, meta: &SourceMeta) -> Duration {
        self.request_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| meta.min_request_interval())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl Default for SourceHttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_interval_ms: None,
            retry_delay_ms: 5000,
            max_retries: 3,
        }
    }
}
