//! Paper sources
//!
//! A source knows how to fetch candidate papers from one external origin.
//! Sources are registered once at startup in a [`SourceRegistry`] keyed by
//! their `source_type`; the set of source types is closed.

mod arxiv_rss;
mod http;
mod semantic_scholar;
mod types;

pub use arxiv_rss::ArxivRssSource;
pub use http::{build_http_client, read_body, send_with_backoff, RequestPacer, RetryPolicy};
pub use semantic_scholar::SemanticScholarSource;
pub use types::{
    FetchedPaper, FieldType, SelectOption, SourceConfig, SourceConfigField, SourceMeta,
};

use crate::config::Config;
use crate::storage::UserSettings;
use crate::{ConfigError, CrawlError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a fetch; any of them fails the whole run
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Rate limited by {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },

    #[error("Failed to parse response from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Invalid source configuration: {0}")]
    Config(#[from] ConfigError),
}

/// The contract every source implements
#[async_trait]
pub trait CrawlSource: Send + Sync {
    /// Static description of the source; no I/O
    fn meta(&self) -> &SourceMeta;

    /// Validates and normalizes raw task configuration
    fn validate_config(&self, raw: &Value) -> Result<SourceConfig, ConfigError> {
        self.meta().validate_config(raw)
    }

    /// Fetches papers, already narrowed by the configured keyword filter
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration returned by `validate_config`
    /// * `since` - When the task last ran, or `None` on the first run
    /// * `user_settings` - The task owner's settings, such as API keys
    async fn fetch(
        &self,
        config: &SourceConfig,
        since: Option<DateTime<Utc>>,
        user_settings: &UserSettings,
    ) -> Result<Vec<FetchedPaper>, FetchError>;
}

/// The built-in source types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    ArxivRss,
    SemanticScholar,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::ArxivRss, SourceKind::SemanticScholar];

    pub fn source_type(&self) -> &'static str {
        match self {
            Self::ArxivRss => "arxiv_rss",
            Self::SemanticScholar => "semantic_scholar",
        }
    }

    pub fn from_source_type(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.source_type() == s)
    }

    fn build(&self, config: &Config, client: Client) -> Arc<dyn CrawlSource> {
        match self {
            Self::ArxivRss => Arc::new(ArxivRssSource::new(client, &config.sources.arxiv_rss)),
            Self::SemanticScholar => Arc::new(SemanticScholarSource::new(
                client,
                &config.sources.semantic_scholar,
            )),
        }
    }
}

/// Maps source types to their implementations
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn CrawlSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every built-in source
    pub fn with_defaults(config: &Config, client: Client) -> Self {
        let mut registry = Self::new();
        for kind in SourceKind::ALL {
            registry.register(kind.build(config, client.clone()));
        }
        registry
    }

    /// Adds a source, replacing any source with the same type
    pub fn register(&mut self, source: Arc<dyn CrawlSource>) {
        let source_type = source.meta().source_type.to_string();
        self.sources.insert(source_type, source);
    }

    /// Looks up a source by type
    pub fn get(&self, source_type: &str) -> Result<Arc<dyn CrawlSource>, CrawlError> {
        self.sources
            .get(source_type)
            .cloned()
            .ok_or_else(|| CrawlError::UnknownSource(source_type.to_string()))
    }

    /// Metadata of every registered source, ordered by type
    pub fn list(&self) -> Vec<SourceMeta> {
        self.sources.values().map(|s| s.meta().clone()).collect()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}
