use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::config::{Config, ConfigError};

use super::bert::CrossEncoder;
use super::device::select_device;
use super::error::ModelError;
use super::utils::resolve_model_source;

/// Backbone families understood by [`build_model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    /// BERT encoder, pooler and a linear classifier.
    Bert,
    /// RoBERTa / XLM-RoBERTa encoder with a dense + tanh + projection head.
    Roberta,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Bert => "bert",
            ModelType::Roberta => "roberta",
        }
    }
}

impl FromStr for ModelType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bert" => Ok(ModelType::Bert),
            // `modelrerank` names the default bge-reranker family.
            "roberta" | "xlm-roberta" | "xlm_roberta" | "modelrerank" => Ok(ModelType::Roberta),
            _ => Err(ConfigError::UnknownModelType {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the configured backbone from `model.model_name_or_path`.
pub fn build_model(config: &Config) -> Result<CrossEncoder, ModelError> {
    let model_type = config.model_type()?;
    let source = resolve_model_source(&config.model.model_name_or_path)?;
    let device = select_device(config.model.device)?;

    info!(
        model_type = %model_type,
        source = %source.display(),
        "Building backbone from pretrained source"
    );
    CrossEncoder::load(&source, model_type, &device, config.model.max_seq_len)
}

/// Loads the trained artifact stored in `logging.save_dir`.
pub fn load_artifact(config: &Config) -> Result<CrossEncoder, ModelError> {
    let model_type = config.model_type()?;
    let device = select_device(config.model.device)?;

    CrossEncoder::load(
        &config.logging.save_dir,
        model_type,
        &device,
        config.model.max_seq_len,
    )
}
