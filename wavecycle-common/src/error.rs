//! Common error types for wavecycle

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for wavecycle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across wavecycle crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
