//! File-backed configuration with environment overrides.
//!
//! Settings come from a `.toml` or `.json` file (path in `RERANK_CONFIG`) layered over
//! defaults. A handful of `RERANK_*` environment variables override the file.

pub mod error;

#[cfg(test)]
mod tests;

pub use error::ConfigError;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    DEFAULT_CLIP_MAX_NORM, DEFAULT_EVAL_INTERVAL, DEFAULT_LEARNING_RATE, DEFAULT_LR_FACTOR,
    DEFAULT_LR_PATIENCE, DEFAULT_MAX_SEQ_LEN, DEFAULT_MODEL_NAME, DEFAULT_MODEL_TYPE,
    DEFAULT_OPTIMIZER_NAME, DEFAULT_SAVE_DIR, DEFAULT_TOTAL_EPOCH, DEFAULT_WEIGHT_DECAY,
};
use crate::model::{DevicePreference, ModelType};

/// Top-level configuration.
///
/// Use [`Config::from_env`] to load the file named by `RERANK_CONFIG` (if any) and apply
/// the remaining `RERANK_*` overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backbone family name, resolved through [`ModelType`]. Default: `modelrerank`.
    pub model_type: String,
    pub model: ModelSettings,
    pub logging: LoggingConfig,
    pub training: TrainingConfig,
}

/// Where the backbone comes from and how it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Local directory or Hugging Face Hub repo id. Default: `BAAI/bge-reranker-base`.
    pub model_name_or_path: String,
    /// Default: `cpu`.
    pub device: DevicePreference,
    /// Token budget per (query, document) pair. Default: `512`.
    pub max_seq_len: usize,
}

/// Run directory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Holds `checkpoint.pth`, `train.log` and the best model artifact. Default: `models`.
    pub save_dir: PathBuf,
}

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// `Adam` or `AdamW`; anything else falls back to Adam.
    pub optimizer_name: String,
    pub weight_decay: f64,
    /// Global L2 gradient-norm bound. Values `<= 0` disable clipping.
    pub clip_max_norm: f64,
    /// Learning-rate multiplier applied on plateau.
    pub factor: f64,
    /// Non-improving epochs tolerated before the learning rate drops.
    pub patience: u64,
    pub lr: f64,
    pub total_epoch: u64,
    /// Validation runs on epochs divisible by this value.
    pub eval_interval: u64,
    /// Optional per-position weights for the cross-entropy loss.
    pub class_weights: Option<Vec<f32>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_type: DEFAULT_MODEL_TYPE.to_string(),
            model: ModelSettings::default(),
            logging: LoggingConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_name_or_path: DEFAULT_MODEL_NAME.to_string(),
            device: DevicePreference::Cpu,
            max_seq_len: DEFAULT_MAX_SEQ_LEN,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            optimizer_name: DEFAULT_OPTIMIZER_NAME.to_string(),
            weight_decay: DEFAULT_WEIGHT_DECAY,
            clip_max_norm: DEFAULT_CLIP_MAX_NORM,
            factor: DEFAULT_LR_FACTOR,
            patience: DEFAULT_LR_PATIENCE,
            lr: DEFAULT_LEARNING_RATE,
            total_epoch: DEFAULT_TOTAL_EPOCH,
            eval_interval: DEFAULT_EVAL_INTERVAL,
            class_weights: None,
        }
    }
}

impl Config {
    pub const ENV_CONFIG_PATH: &'static str = "RERANK_CONFIG";
    const ENV_SAVE_DIR: &'static str = "RERANK_SAVE_DIR";
    const ENV_MODEL_PATH: &'static str = "RERANK_MODEL_PATH";
    const ENV_DEVICE: &'static str = "RERANK_DEVICE";

    /// Loads the file named by `RERANK_CONFIG` (or defaults) and applies env overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match Self::parse_optional_path_from_env(Self::ENV_CONFIG_PATH) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parses a `.toml` or `.json` configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let parse_failed = |reason: String| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            reason,
        };

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let config = match extension.as_deref() {
            Some("toml") => toml::from_str(&contents).map_err(|e| parse_failed(e.to_string()))?,
            Some("json") => {
                serde_json::from_str(&contents).map_err(|e| parse_failed(e.to_string()))?
            }
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                });
            }
        };

        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Applies `RERANK_SAVE_DIR`, `RERANK_MODEL_PATH` and `RERANK_DEVICE` on top of the
    /// current values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(save_dir) = Self::parse_optional_path_from_env(Self::ENV_SAVE_DIR) {
            self.logging.save_dir = save_dir;
        }

        if let Some(model) = Self::parse_optional_string_from_env(Self::ENV_MODEL_PATH) {
            self.model.model_name_or_path = model;
        }

        if let Some(device) = Self::parse_optional_string_from_env(Self::ENV_DEVICE) {
            self.model.device = device
                .parse()
                .map_err(|reason| ConfigError::InvalidDevice {
                    value: device.clone(),
                    reason,
                })?;
        }

        Ok(())
    }

    /// Resolves [`Config::model_type`] to a backbone family.
    pub fn model_type(&self) -> Result<ModelType, ConfigError> {
        self.model_type.parse()
    }

    /// Validates value ranges and paths (does not create directories).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model_type()?;

        if self.model.model_name_or_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "model.model_name_or_path",
                reason: "cannot be empty".to_string(),
            });
        }

        if self.model.max_seq_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "model.max_seq_len",
                reason: "must be greater than 0".to_string(),
            });
        }

        let save_dir = &self.logging.save_dir;
        if save_dir.exists() && !save_dir.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: save_dir.clone(),
            });
        }

        self.training.validate()
    }

    fn parse_optional_path_from_env(var_name: &str) -> Option<PathBuf> {
        Self::parse_optional_string_from_env(var_name).map(PathBuf::from)
    }

    fn parse_optional_string_from_env(var_name: &str) -> Option<String> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl TrainingConfig {
    /// Checks hyperparameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must be a positive number, got {}", value),
                })
            }
        };

        positive("training.lr", self.lr)?;

        if !(self.factor > 0.0 && self.factor < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "training.factor",
                reason: format!("must be in (0, 1), got {}", self.factor),
            });
        }

        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "training.weight_decay",
                reason: format!("must be non-negative, got {}", self.weight_decay),
            });
        }

        if !self.clip_max_norm.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "training.clip_max_norm",
                reason: "must be finite".to_string(),
            });
        }

        if self.eval_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "training.eval_interval",
                reason: "must be greater than 0".to_string(),
            });
        }

        if let Some(weights) = &self.class_weights {
            if weights.is_empty() || weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: "training.class_weights",
                    reason: "must be a non-empty list of non-negative numbers".to_string(),
                });
            }
            if weights.iter().sum::<f32>() <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "training.class_weights",
                    reason: "at least one weight must be positive".to_string(),
                });
            }
        }

        Ok(())
    }
}
