use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// A validated configuration and the digest of the file it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// Hex-encoded SHA-256 of the raw file, logged at startup
    pub hash: String,
}

/// Parses and validates configuration text
///
/// Every section is optional; missing sections fall back to their defaults.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Loads a configuration file
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(LoadedConfig)` - The validated configuration and the file's hash
/// * `Err(ConfigError)` - The file could not be read, parsed or validated
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sharebib_crawl::config::load_config;
///
/// let loaded = load_config(Path::new("sharebib.toml")).unwrap();
/// println!("Database: {}", loaded.config.storage.database_path.display());
/// ```
pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok(LoadedConfig {
        config,
        hash: content_hash(&content),
    })
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
