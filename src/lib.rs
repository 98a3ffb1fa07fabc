//! ShareBib crawl: scheduled import of papers into shared collections
//!
//! This crate implements the scheduled crawl subsystem: a registry of pluggable
//! paper sources, a keyword filter shared by those sources, a deduplication
//! cascade, an executor that writes fetched papers into collections, and a
//! polling scheduler with a per-task reentrancy guard.

pub mod config;
pub mod crawl;
pub mod dedup;
pub mod filter;
pub mod sources;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown source type: {0}")]
    UnknownSource(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] sources::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Crawl task not found: {0}")]
    TaskNotFound(String),

    #[error("Crawl task {0} is currently running")]
    TaskBusy(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors, for both the application config file and the
/// per-task source configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required config: {0}")]
    MissingField(String),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidField { key: String, reason: String },

    #[error("Schedule '{schedule}' is not supported by source '{source_type}'")]
    UnsupportedSchedule {
        source_type: String,
        schedule: String,
    },
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawl::{CrawlExecutor, CrawlScheduler, ExecutionResult, TaskService};
pub use sources::{CrawlSource, FetchedPaper, SourceRegistry};
pub use state::{DuplicateStrategy, RunStatus, ScheduleType, TargetMode};
