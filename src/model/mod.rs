//! Backbone models + loading utilities.
//!
//! - [`bert`] provides the trainable cross-encoder built on `candle-transformers`.
//! - [`registry`] maps the configured `model_type` onto a backbone family.
//! - [`artifact`] stages artifact writes so a reader never loads a half-written model.

/// Staged, rename-into-place artifact writes.
pub mod artifact;
/// Trainable BERT/RoBERTa cross-encoder.
pub mod bert;
/// Device selection (CPU / Metal / CUDA).
pub mod device;
mod error;
/// Deterministic in-memory backbone for tests.
#[cfg(any(test, feature = "mock"))]
pub mod mock;
/// Backbone families and factory functions.
pub mod registry;
/// Tokenizer loading and model-source resolution.
pub mod utils;

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;

pub use bert::CrossEncoder;
pub use device::{DevicePreference, select_device};
pub use error::ModelError;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockCrossEncoder, word_tokenizer};
pub use registry::{ModelType, build_model, load_artifact};

/// A sequence-classification network scoring (query, document) pairs.
///
/// Implementors own their weights as candle [`Var`]s so the trainer can update them in
/// place, and know how to write and re-read their own artifact directory.
pub trait Backbone {
    /// Runs the network over a flat batch of pairs.
    ///
    /// `input_ids` and `attention_mask` are `[pairs, seq_len]`; the result is
    /// `[pairs, num_labels]` logits.
    fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: &Tensor,
    ) -> candle_core::Result<Tensor>;

    /// Trainable parameters, sorted by name.
    fn named_vars(&self) -> Result<Vec<(String, Var)>, ModelError>;

    fn device(&self) -> &Device;

    /// Writes weights and configuration into `dir`, creating it if needed.
    fn save_artifact(&self, dir: &Path) -> Result<(), ModelError>;

    /// Overwrites the current weights with the ones stored in `dir`.
    fn reload_weights(&self, dir: &Path) -> Result<(), ModelError>;
}

/// Reduces `[pairs, num_labels]` logits to one relevance score per pair.
///
/// Single-logit heads return the logit itself; two-label heads return
/// `logit[1] - logit[0]`.
pub fn pair_scores(logits: &Tensor) -> candle_core::Result<Tensor> {
    let (_, num_labels) = logits.dims2()?;
    match num_labels {
        1 => logits.squeeze(1),
        2 => {
            let positive = logits.narrow(1, 1, 1)?;
            let negative = logits.narrow(1, 0, 1)?;
            (positive - negative)?.squeeze(1)
        }
        n => candle_core::bail!("cannot derive a relevance score from {n} labels"),
    }
}

/// Copies tensors from `weights` into the variables of `varmap`.
///
/// Returns the names of variables that had no counterpart in `weights`; those keep
/// their current values.
pub(crate) fn assign_weights(
    varmap: &VarMap,
    weights: &HashMap<String, Tensor>,
) -> Result<Vec<String>, ModelError> {
    let vars = varmap.data().lock().map_err(|_| ModelError::LoadFailed {
        reason: "variable map lock poisoned".to_string(),
    })?;
    assign_named(vars.iter(), weights)
}

/// [`assign_weights`] for backbones that keep their variables in a plain list.
#[cfg_attr(not(any(test, feature = "mock")), allow(dead_code))]
pub(crate) fn assign_weights_to_vars(
    vars: &[(String, Var)],
    weights: &HashMap<String, Tensor>,
) -> Result<Vec<String>, ModelError> {
    assign_named(vars.iter().map(|(name, var)| (name, var)), weights)
}

fn assign_named<'a>(
    vars: impl Iterator<Item = (&'a String, &'a Var)>,
    weights: &HashMap<String, Tensor>,
) -> Result<Vec<String>, ModelError> {
    let mut missing = Vec::new();
    for (name, var) in vars {
        match weights.get(name) {
            Some(tensor) => set_var(name, var, tensor)?,
            None => missing.push(name.clone()),
        }
    }

    missing.sort();
    Ok(missing)
}

pub(crate) fn set_var(name: &str, var: &Var, tensor: &Tensor) -> Result<(), ModelError> {
    if tensor.dims() != var.dims() {
        return Err(ModelError::LoadFailed {
            reason: format!(
                "shape mismatch for '{}': expected {:?}, found {:?}",
                name,
                var.dims(),
                tensor.dims()
            ),
        });
    }

    let tensor = tensor.to_dtype(var.dtype())?.to_device(var.device())?;
    var.set(&tensor)?;
    Ok(())
}
