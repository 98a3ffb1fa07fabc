//! Configuration module
//!
//! This module handles loading, parsing, and validating the TOML application
//! configuration: scheduler cadence, database location, user agent, HTTP
//! client settings and per-source endpoints.
//!
//! # Example
//!
//! ```no_run
//! use sharebib_crawl::config::load_config;
//! use std::path::Path;
//!
//! let loaded = load_config(Path::new("sharebib.toml")).unwrap();
//! println!("Polling every {}s", loaded.config.scheduler.poll_interval_secs);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, HttpConfig, SchedulerConfig, SourceHttpConfig, SourcesConfig, StorageConfig,
    UserAgentConfig,
};

pub use parser::{load_config, parse_config, LoadedConfig};
