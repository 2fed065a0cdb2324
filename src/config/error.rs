//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file was read but could not be parsed.
    #[error("failed to parse config file {path}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },

    /// File extension is neither `.toml` nor `.json`.
    #[error("unsupported config format for {path} (expected .toml or .json)")]
    UnsupportedFormat { path: PathBuf },

    /// `model_type` does not name a known backbone family.
    #[error("unknown model type '{value}'")]
    UnknownModelType { value: String },

    /// Device string could not be parsed.
    #[error("invalid device '{value}': {reason}")]
    InvalidDevice { value: String, reason: String },

    /// A numeric or string setting is outside its valid range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Path exists but is not a directory (when a directory was expected).
    #[error("path is not a directory: {path}")]
    NotADirectory { path: PathBuf },
}
