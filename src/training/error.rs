//! Training error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum TrainingError {
    /// Tensor or sequence dimensions do not line up.
    #[error("shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    /// A masked loss was requested with a mask that selects no examples.
    #[error("loss mask selects no examples")]
    EmptyMask,

    /// `checkpoint.pth` exists but cannot be decoded.
    #[error("corrupt checkpoint at {path}: {reason}")]
    CorruptCheckpoint { path: PathBuf, reason: String },

    /// A train or test pass produced no batches, so its average is undefined.
    #[error("{pass} source yielded no batches")]
    EmptySource { pass: &'static str },

    /// Invalid hyperparameter or trainer setting.
    #[error("invalid training setting: {reason}")]
    InvalidSetting { reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("tensor operation failed: {0}")]
    Candle(#[from] candle_core::Error),
}

impl TrainingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainingError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        TrainingError::ShapeMismatch {
            reason: reason.into(),
        }
    }
}

pub type TrainingResult<T> = Result<T, TrainingError>;
