use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("tokenization failed: {reason}")]
    TokenizationFailed { reason: String },

    #[error("scoring inference failed: {reason}")]
    InferenceFailed { reason: String },
}

impl From<candle_core::Error> for ScoringError {
    fn from(err: candle_core::Error) -> Self {
        ScoringError::InferenceFailed {
            reason: err.to_string(),
        }
    }
}
