//! Error types for configuration loading.

use std::path::PathBuf;

use thiserror::Error;

/// Alias for `Result<T, ConfigError>`.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or a known key has the wrong type.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
