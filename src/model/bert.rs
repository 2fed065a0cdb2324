use std::collections::HashMap;
use std::fs;
use std::path::Path;

use candle_core::{DType, Device, IndexOp, Result, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config};
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::constants::{MODEL_CONFIG_FILENAME, TOKENIZER_FILENAME, WEIGHTS_FILENAME};

use super::artifact::ArtifactStaging;
use super::error::ModelError;
use super::registry::ModelType;
use super::utils::{ensure_artifact_files, load_tokenizer_with_truncation};
use super::{Backbone, assign_weights};

/// Classification head stacked on the encoder's `[CLS]` hidden state.
enum ClassificationHead {
    /// `BertForSequenceClassification`: pooler (dense + tanh) then a linear classifier.
    Pooled { pooler: Linear, classifier: Linear },
    /// `RobertaForSequenceClassification`: `classifier.dense` + tanh + `classifier.out_proj`.
    Projected { dense: Linear, out_proj: Linear },
}

impl ClassificationHead {
    fn load(
        model_type: ModelType,
        vb: &VarBuilder,
        encoder_prefix: &str,
        hidden_size: usize,
        num_labels: usize,
    ) -> Result<Self> {
        match model_type {
            ModelType::Bert => {
                let pooler_vb = if encoder_prefix.is_empty() {
                    vb.pp("pooler")
                } else {
                    vb.pp(encoder_prefix).pp("pooler")
                };
                let pooler = candle_nn::linear(hidden_size, hidden_size, pooler_vb.pp("dense"))?;
                let classifier = candle_nn::linear(hidden_size, num_labels, vb.pp("classifier"))?;
                Ok(Self::Pooled { pooler, classifier })
            }
            ModelType::Roberta => {
                let head_vb = vb.pp("classifier");
                let dense = candle_nn::linear(hidden_size, hidden_size, head_vb.pp("dense"))?;
                let out_proj = candle_nn::linear(hidden_size, num_labels, head_vb.pp("out_proj"))?;
                Ok(Self::Projected { dense, out_proj })
            }
        }
    }

    fn forward(&self, cls_token: &Tensor) -> Result<Tensor> {
        match self {
            Self::Pooled { pooler, classifier } => {
                let pooled = pooler.forward(cls_token)?.tanh()?;
                classifier.forward(&pooled)
            }
            Self::Projected { dense, out_proj } => {
                let hidden = dense.forward(cls_token)?.tanh()?;
                out_proj.forward(&hidden)
            }
        }
    }
}

/// Fields of the Hugging Face config that describe the classification head.
#[derive(Debug, Default, Deserialize)]
struct HeadConfig {
    num_labels: Option<usize>,
    id2label: Option<HashMap<String, String>>,
}

impl HeadConfig {
    fn num_labels(&self) -> usize {
        self.num_labels
            .or_else(|| self.id2label.as_ref().map(HashMap::len))
            .filter(|n| *n > 0)
            .unwrap_or(1)
    }
}

/// Finds the encoder prefix used by a checkpoint (`bert.`, `roberta.` or none).
fn detect_encoder_prefix(weights: &HashMap<String, Tensor>) -> &'static str {
    if weights.contains_key("bert.embeddings.word_embeddings.weight") {
        "bert"
    } else if weights.contains_key("roberta.embeddings.word_embeddings.weight") {
        "roberta"
    } else {
        ""
    }
}

fn load_weight_file(path: &Path, device: &Device) -> std::result::Result<HashMap<String, Tensor>, ModelError> {
    if !path.is_file() {
        return Err(ModelError::MissingFile {
            path: path.to_path_buf(),
        });
    }

    candle_core::safetensors::load(path, device).map_err(|e| ModelError::LoadFailed {
        reason: format!("failed to read {}: {}", path.display(), e),
    })
}

/// Trainable cross-encoder: a BERT-family encoder plus a sequence-classification head.
///
/// All parameters live in a [`VarMap`], so the same instance serves training (the
/// optimizer updates the variables in place) and inference.
pub struct CrossEncoder {
    model_type: ModelType,
    bert: BertModel,
    head: ClassificationHead,
    num_labels: usize,
    varmap: VarMap,
    config_json: String,
    tokenizer: Tokenizer,
    max_seq_len: usize,
    device: Device,
}

impl std::fmt::Debug for CrossEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossEncoder")
            .field("model_type", &self.model_type)
            .field("num_labels", &self.num_labels)
            .field("max_seq_len", &self.max_seq_len)
            .field("device", &format!("{:?}", self.device))
            .finish()
    }
}

impl CrossEncoder {
    /// Loads a cross-encoder from a directory holding `config.json`,
    /// `model.safetensors` and `tokenizer.json`.
    ///
    /// Parameters absent from the weight file (typically a freshly added
    /// classification head) keep their random initialization and are logged.
    pub fn load<P: AsRef<Path>>(
        model_dir: P,
        model_type: ModelType,
        device: &Device,
        max_seq_len: usize,
    ) -> std::result::Result<Self, ModelError> {
        let model_dir = model_dir.as_ref();
        ensure_artifact_files(model_dir)?;

        info!(
            model_dir = %model_dir.display(),
            model_type = %model_type,
            "Loading cross-encoder"
        );

        let config_path = model_dir.join(MODEL_CONFIG_FILENAME);
        let config_json = fs::read_to_string(&config_path)
            .map_err(|e| ModelError::artifact_io(&config_path, e))?;
        let config: Config =
            serde_json::from_str(&config_json).map_err(|e| ModelError::LoadFailed {
                reason: format!("Failed to parse config: {}", e),
            })?;
        let head_config: HeadConfig =
            serde_json::from_str(&config_json).map_err(|e| ModelError::LoadFailed {
                reason: format!("Failed to parse head config: {}", e),
            })?;
        let num_labels = head_config.num_labels();

        let weights = load_weight_file(&model_dir.join(WEIGHTS_FILENAME), device)?;
        let prefix = detect_encoder_prefix(&weights);
        debug!(prefix, tensors = weights.len(), "Read weight file");

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let encoder_vb = if prefix.is_empty() {
            vb.clone()
        } else {
            vb.pp(prefix)
        };

        let bert = BertModel::load(encoder_vb, &config).map_err(|e| ModelError::LoadFailed {
            reason: format!("Failed to build BERT encoder: {}", e),
        })?;
        let head = ClassificationHead::load(model_type, &vb, prefix, config.hidden_size, num_labels)
            .map_err(|e| ModelError::LoadFailed {
                reason: format!("Failed to build classification head: {}", e),
            })?;

        let missing = assign_weights(&varmap, &weights)?;
        if !missing.is_empty() {
            warn!(
                count = missing.len(),
                names = ?missing,
                "Parameters not found in checkpoint, keeping fresh initialization"
            );
        }

        let tokenizer = load_tokenizer_with_truncation(model_dir, max_seq_len).map_err(|e| {
            ModelError::LoadFailed {
                reason: format!("Failed to load tokenizer: {}", e),
            }
        })?;

        info!(num_labels, "Cross-encoder loaded");

        Ok(Self {
            model_type,
            bert,
            head,
            num_labels,
            varmap,
            config_json,
            tokenizer,
            max_seq_len,
            device: device.clone(),
        })
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

impl Backbone for CrossEncoder {
    fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: &Tensor,
    ) -> Result<Tensor> {
        let token_type_ids = match token_type_ids {
            Some(ids) => ids.clone(),
            None => input_ids.zeros_like()?,
        };

        let output = self
            .bert
            .forward(input_ids, &token_type_ids, Some(attention_mask))?;
        let cls_token = output.i((.., 0, ..))?;
        self.head.forward(&cls_token)
    }

    fn named_vars(&self) -> std::result::Result<Vec<(String, Var)>, ModelError> {
        let data = self.varmap.data().lock().map_err(|_| ModelError::LoadFailed {
            reason: "variable map lock poisoned".to_string(),
        })?;

        let mut vars: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn save_artifact(&self, dir: &Path) -> std::result::Result<(), ModelError> {
        let mut staging = ArtifactStaging::new(dir)?;

        let tokenizer_path = staging.file(TOKENIZER_FILENAME);
        self.tokenizer
            .save(&tokenizer_path, false)
            .map_err(|e| ModelError::artifact_io(&tokenizer_path, std::io::Error::other(e.to_string())))?;

        let weights_path = staging.file(WEIGHTS_FILENAME);
        self.varmap
            .save(&weights_path)
            .map_err(|e| ModelError::artifact_io(&weights_path, std::io::Error::other(e.to_string())))?;

        let config_path = staging.file(MODEL_CONFIG_FILENAME);
        fs::write(&config_path, &self.config_json)
            .map_err(|e| ModelError::artifact_io(&config_path, e))?;

        staging.commit()?;
        info!(dir = %dir.display(), "Saved cross-encoder artifact");
        Ok(())
    }

    fn reload_weights(&self, dir: &Path) -> std::result::Result<(), ModelError> {
        let weights = load_weight_file(&dir.join(WEIGHTS_FILENAME), &self.device)?;
        let missing = assign_weights(&self.varmap, &weights)?;
        if !missing.is_empty() {
            warn!(
                count = missing.len(),
                "Reloaded weights did not cover every parameter"
            );
        }
        info!(dir = %dir.display(), "Reloaded cross-encoder weights");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_config_num_labels() {
        let explicit: HeadConfig = serde_json::from_str(r#"{"num_labels": 2}"#).unwrap();
        assert_eq!(explicit.num_labels(), 2);

        let from_labels: HeadConfig =
            serde_json::from_str(r#"{"id2label": {"0": "LABEL_0"}}"#).unwrap();
        assert_eq!(from_labels.num_labels(), 1);

        let absent: HeadConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.num_labels(), 1);
    }

    #[test]
    fn test_detect_encoder_prefix() {
        let tensor = Tensor::zeros(1, DType::F32, &Device::Cpu).unwrap();

        let mut weights = HashMap::new();
        assert_eq!(detect_encoder_prefix(&weights), "");

        weights.insert(
            "roberta.embeddings.word_embeddings.weight".to_string(),
            tensor.clone(),
        );
        assert_eq!(detect_encoder_prefix(&weights), "roberta");

        weights.insert("bert.embeddings.word_embeddings.weight".to_string(), tensor);
        assert_eq!(detect_encoder_prefix(&weights), "bert");
    }

    #[test]
    fn test_load_missing_directory() {
        let result = CrossEncoder::load("/nonexistent/model", ModelType::Bert, &Device::Cpu, 128);
        assert!(matches!(result, Err(ModelError::NotFound { .. })));
    }

    #[test]
    fn test_load_missing_weights() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::write(temp.path().join(MODEL_CONFIG_FILENAME), "{}").unwrap();

        let result = CrossEncoder::load(temp.path(), ModelType::Roberta, &Device::Cpu, 128);
        assert!(matches!(result, Err(ModelError::MissingFile { .. })));
    }
}
