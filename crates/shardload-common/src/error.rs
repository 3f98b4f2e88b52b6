//! Error types shared across shardload crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for shared shardload operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading and validating configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not read {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a validation failure
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}
