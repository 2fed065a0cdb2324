use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model source not found at path: {path}")]
    NotFound { path: PathBuf },

    #[error("model artifact is missing {path}")]
    MissingFile { path: PathBuf },

    #[error("failed to load model: {reason}")]
    LoadFailed { reason: String },

    #[error("failed to fetch '{repo}' from the model hub: {reason}")]
    DownloadFailed { repo: String, reason: String },

    #[error("{device} device unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("model inference failed: {reason}")]
    InferenceFailed { reason: String },

    #[error("tokenization failed: {reason}")]
    TokenizationFailed { reason: String },

    #[error("invalid model configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("artifact I/O failed at {path}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ModelError {
    pub(crate) fn artifact_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModelError::ArtifactIo {
            path: path.into(),
            source,
        }
    }
}

impl From<candle_core::Error> for ModelError {
    fn from(err: candle_core::Error) -> Self {
        ModelError::InferenceFailed {
            reason: err.to_string(),
        }
    }
}
