//! Small deterministic backbone for tests (no pretrained weights needed).

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use candle_core::{D, DType, Device, Result, Tensor, Var};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;
use tracing::debug;

use crate::constants::{MODEL_CONFIG_FILENAME, WEIGHTS_FILENAME};

use super::artifact::ArtifactStaging;
use super::error::ModelError;
use super::utils::ensure_artifact_files;
use super::{Backbone, assign_weights_to_vars};

const EMBEDDINGS: &str = "embeddings.weight";
const CLASSIFIER_WEIGHT: &str = "classifier.weight";
const CLASSIFIER_BIAS: &str = "classifier.bias";

const UNK_TOKEN: &str = "[UNK]";

/// Whitespace word-level tokenizer over `words`; anything else maps to `[UNK]` (id 0).
pub fn word_tokenizer(words: &[&str]) -> std::result::Result<Tokenizer, ModelError> {
    let mut vocab = serde_json::Map::new();
    vocab.insert(UNK_TOKEN.to_string(), 0.into());
    for word in words {
        let next = vocab.len();
        vocab.entry(word.to_string()).or_insert_with(|| next.into());
    }

    let definition = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": vocab, "unk_token": UNK_TOKEN },
    });

    Tokenizer::from_str(&definition.to_string()).map_err(|e| ModelError::TokenizationFailed {
        reason: e.to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct MockConfig {
    model_type: String,
    vocab_size: usize,
    hidden_size: usize,
}

/// Mean-pooled embedding bag followed by a single-logit linear head.
///
/// Initialization is a fixed function of the parameter index, so two instances built
/// with the same sizes are identical.
#[derive(Debug)]
pub struct MockCrossEncoder {
    vocab_size: usize,
    hidden_size: usize,
    vars: Vec<(String, Var)>,
    device: Device,
}

fn deterministic_var(shape: &[usize], seed: f32, device: &Device) -> Result<Var> {
    let len: usize = shape.iter().product();
    let values: Vec<f32> = (0..len)
        .map(|i| ((i as f32 + 1.0) * 0.61 + seed).sin() * 0.1)
        .collect();
    Var::from_tensor(&Tensor::from_vec(values, shape, device)?)
}

impl MockCrossEncoder {
    pub fn new(vocab_size: usize, hidden_size: usize, device: &Device) -> Result<Self> {
        let mut vars = vec![
            (
                CLASSIFIER_BIAS.to_string(),
                deterministic_var(&[1], 0.3, device)?,
            ),
            (
                CLASSIFIER_WEIGHT.to_string(),
                deterministic_var(&[1, hidden_size], 0.2, device)?,
            ),
            (
                EMBEDDINGS.to_string(),
                deterministic_var(&[vocab_size, hidden_size], 0.1, device)?,
            ),
        ];
        vars.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            vocab_size,
            hidden_size,
            vars,
            device: device.clone(),
        })
    }

    /// Loads an artifact previously written by [`Backbone::save_artifact`].
    pub fn load(dir: &Path, device: &Device) -> std::result::Result<Self, ModelError> {
        ensure_artifact_files(dir)?;

        let config_path = dir.join(MODEL_CONFIG_FILENAME);
        let raw =
            fs::read_to_string(&config_path).map_err(|e| ModelError::artifact_io(&config_path, e))?;
        let config: MockConfig = serde_json::from_str(&raw).map_err(|e| ModelError::LoadFailed {
            reason: format!("Failed to parse mock config: {}", e),
        })?;

        let model = Self::new(config.vocab_size, config.hidden_size, device)?;
        model.reload_weights(dir)?;
        Ok(model)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn var(&self, name: &str) -> Result<&Var> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| candle_core::Error::Msg(format!("missing variable {name}")))
    }

    /// Flat copy of every parameter, in name order.
    pub fn flat_weights(&self) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        for (_, var) in &self.vars {
            out.extend(var.as_tensor().flatten_all()?.to_vec1::<f32>()?);
        }
        Ok(out)
    }
}

impl Backbone for MockCrossEncoder {
    fn forward(
        &self,
        input_ids: &Tensor,
        _token_type_ids: Option<&Tensor>,
        attention_mask: &Tensor,
    ) -> Result<Tensor> {
        let (pairs, seq_len) = input_ids.dims2()?;

        // Out-of-range ids wrap so any tokenizer vocabulary fits.
        let ids: Vec<u32> = input_ids
            .to_dtype(DType::U32)?
            .flatten_all()?
            .to_vec1::<u32>()?
            .into_iter()
            .map(|id| id % self.vocab_size as u32)
            .collect();
        let ids = Tensor::from_vec(ids, pairs * seq_len, &self.device)?;

        let embedded = self
            .var(EMBEDDINGS)?
            .as_tensor()
            .index_select(&ids, 0)?
            .reshape((pairs, seq_len, self.hidden_size))?;

        let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(D::Minus1)?;
        let summed = embedded.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1.0, f64::MAX)?;
        let pooled = summed.broadcast_div(&counts)?;

        let weight = self.var(CLASSIFIER_WEIGHT)?.as_tensor();
        let bias = self.var(CLASSIFIER_BIAS)?.as_tensor();
        pooled.matmul(&weight.t()?)?.broadcast_add(bias)
    }

    fn named_vars(&self) -> std::result::Result<Vec<(String, Var)>, ModelError> {
        Ok(self.vars.clone())
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn save_artifact(&self, dir: &Path) -> std::result::Result<(), ModelError> {
        let mut staging = ArtifactStaging::new(dir)?;

        let tensors: HashMap<String, Tensor> = self
            .vars
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        let weights_path = staging.file(WEIGHTS_FILENAME);
        candle_core::safetensors::save(&tensors, &weights_path)
            .map_err(|e| ModelError::artifact_io(&weights_path, std::io::Error::other(e.to_string())))?;

        let config = MockConfig {
            model_type: "mock".to_string(),
            vocab_size: self.vocab_size,
            hidden_size: self.hidden_size,
        };
        let config_json = serde_json::to_string_pretty(&config).map_err(|e| {
            ModelError::InvalidConfig {
                reason: e.to_string(),
            }
        })?;
        let config_path = staging.file(MODEL_CONFIG_FILENAME);
        fs::write(&config_path, config_json).map_err(|e| ModelError::artifact_io(&config_path, e))?;

        staging.commit()?;
        debug!(dir = %dir.display(), "Saved mock artifact");
        Ok(())
    }

    fn reload_weights(&self, dir: &Path) -> std::result::Result<(), ModelError> {
        let path = dir.join(WEIGHTS_FILENAME);
        if !path.is_file() {
            return Err(ModelError::MissingFile { path });
        }
        let weights = candle_core::safetensors::load(&path, &self.device)?;
        let missing = assign_weights_to_vars(&self.vars, &weights)?;
        if !missing.is_empty() {
            return Err(ModelError::LoadFailed {
                reason: format!("artifact is missing parameters: {:?}", missing),
            });
        }
        Ok(())
    }
}
