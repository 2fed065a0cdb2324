use candle_core::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::config::Config;
use crate::model::utils::apply_truncation;
use crate::model::{Backbone, CrossEncoder, load_artifact, pair_scores};

use super::error::ScoringError;

/// Scores documents against a query with a trained cross-encoder.
pub struct Reranker<B: Backbone> {
    backbone: B,
    tokenizer: Tokenizer,
    max_seq_len: usize,
}

impl<B: Backbone> std::fmt::Debug for Reranker<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reranker")
            .field("device", &format!("{:?}", self.backbone.device()))
            .field("max_seq_len", &self.max_seq_len)
            .finish()
    }
}

impl<B: Backbone> Reranker<B> {
    /// Pairs `backbone` with `tokenizer`, truncating every pair to `max_seq_len` tokens.
    pub fn new(
        backbone: B,
        mut tokenizer: Tokenizer,
        max_seq_len: usize,
    ) -> Result<Self, ScoringError> {
        apply_truncation(&mut tokenizer, max_seq_len).map_err(|e| {
            ScoringError::TokenizationFailed {
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            backbone,
            tokenizer,
            max_seq_len,
        })
    }

    pub fn backbone(&self) -> &B {
        &self.backbone
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Relevance score of a single (query, document) pair.
    pub fn score(&self, query: &str, doc: &str) -> Result<f32, ScoringError> {
        let encoding = self.tokenizer.encode((query, doc), true).map_err(|e| {
            ScoringError::TokenizationFailed {
                reason: e.to_string(),
            }
        })?;

        let input_ids = self.row(encoding.get_ids())?;
        let type_ids = self.row(encoding.get_type_ids())?;
        let attention_mask = self.row(encoding.get_attention_mask())?;

        let logits = self
            .backbone
            .forward(&input_ids, Some(&type_ids), &attention_mask)
            .map_err(|e| ScoringError::InferenceFailed {
                reason: e.to_string(),
            })?;

        let scores = pair_scores(&logits)?.to_vec1::<f32>()?;
        scores
            .first()
            .copied()
            .ok_or_else(|| ScoringError::InferenceFailed {
                reason: "backbone returned no logits".to_string(),
            })
    }

    /// One score per entry of `docs`, in input order.
    pub fn rerank(&self, query: &str, docs: &[&str]) -> Result<Vec<f32>, ScoringError> {
        debug!(
            query_len = query.len(),
            num_docs = docs.len(),
            "Scoring documents"
        );

        let scores = docs
            .iter()
            .map(|doc| self.score(query, doc))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            max_score = scores.iter().copied().reduce(f32::max),
            "Scoring complete"
        );
        Ok(scores)
    }

    fn row(&self, values: &[u32]) -> Result<Tensor, ScoringError> {
        Ok(Tensor::new(values, self.backbone.device())?.unsqueeze(0)?)
    }
}

impl Reranker<CrossEncoder> {
    /// Uses the tokenizer and sequence length the encoder was loaded with.
    pub fn from_cross_encoder(model: CrossEncoder) -> Result<Self, ScoringError> {
        let tokenizer = model.tokenizer().clone();
        let max_seq_len = model.max_seq_len();
        Self::new(model, tokenizer, max_seq_len)
    }

    /// Loads the best artifact saved under `logging.save_dir`.
    pub fn from_config(config: &Config) -> Result<Self, ScoringError> {
        let model = load_artifact(config)?;
        info!(
            save_dir = %config.logging.save_dir.display(),
            model_type = %model.model_type(),
            "Loaded reranker artifact"
        );
        Self::from_cross_encoder(model)
    }
}
