//! Batches fed to the trainer.
//!
//! Dataset construction and tokenization happen upstream. A [`Batch`] holds one group
//! of candidate documents per query: exactly one candidate is relevant and `label`
//! gives its position inside the group.

use candle_core::{DType, Tensor};

use super::error::{TrainingError, TrainingResult};

/// One fixed-shape training batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, group, seq]` token ids.
    pub input_ids: Tensor,
    /// `[batch, group, seq]`, 1 for real tokens and 0 for padding.
    pub attention_mask: Tensor,
    /// `[batch]` index of the relevant candidate in each group.
    pub label: Tensor,
    /// Optional `[batch]` per-example loss weight.
    pub mask: Option<Tensor>,
}

impl Batch {
    /// Validates shapes and normalizes dtypes (`u32` ids and labels, `f32` mask).
    ///
    /// A `[batch, 1]` label is accepted and flattened.
    pub fn new(
        input_ids: Tensor,
        attention_mask: Tensor,
        label: Tensor,
        mask: Option<Tensor>,
    ) -> TrainingResult<Self> {
        let (batch, group, seq) = input_ids.dims3().map_err(|_| {
            TrainingError::shape(format!(
                "input_ids must be [batch, group, seq], got {:?}",
                input_ids.dims()
            ))
        })?;

        if batch == 0 || group == 0 || seq == 0 {
            return Err(TrainingError::shape(format!(
                "batch has an empty dimension: {:?}",
                input_ids.dims()
            )));
        }

        if attention_mask.dims() != input_ids.dims() {
            return Err(TrainingError::shape(format!(
                "attention_mask {:?} does not match input_ids {:?}",
                attention_mask.dims(),
                input_ids.dims()
            )));
        }

        let label_dims = label.dims().to_vec();
        let label = match label_dims.as_slice() {
            [n] if *n == batch => label,
            [n, 1] if *n == batch => label.squeeze(1)?,
            dims => {
                return Err(TrainingError::shape(format!(
                    "label must be [{batch}] or [{batch}, 1], got {:?}",
                    dims
                )));
            }
        };

        let mask = match mask {
            Some(mask) if mask.dims() == [batch] => Some(mask.to_dtype(DType::F32)?),
            Some(mask) => {
                return Err(TrainingError::shape(format!(
                    "mask must be [{batch}], got {:?}",
                    mask.dims()
                )));
            }
            None => None,
        };

        Ok(Self {
            input_ids: input_ids.to_dtype(DType::U32)?,
            attention_mask: attention_mask.to_dtype(DType::U32)?,
            label: label.to_dtype(DType::U32)?,
            mask,
        })
    }

    /// `(batch, group, seq)`.
    pub fn dims(&self) -> TrainingResult<(usize, usize, usize)> {
        Ok(self.input_ids.dims3()?)
    }

    /// Inputs reshaped to `[batch * group, seq]` for the backbone.
    pub fn flat_inputs(&self) -> TrainingResult<(Tensor, Tensor)> {
        let (batch, group, seq) = self.dims()?;
        let ids = self.input_ids.reshape((batch * group, seq))?;
        let mask = self.attention_mask.reshape((batch * group, seq))?;
        Ok((ids, mask))
    }

    pub fn labels(&self) -> TrainingResult<Vec<u32>> {
        Ok(self.label.to_vec1::<u32>()?)
    }
}

/// Anything that can replay a sequence of batches once per epoch.
pub trait BatchSource {
    fn batches(&self) -> Box<dyn Iterator<Item = TrainingResult<Batch>> + '_>;
}

impl BatchSource for [Batch] {
    fn batches(&self) -> Box<dyn Iterator<Item = TrainingResult<Batch>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

impl BatchSource for Vec<Batch> {
    fn batches(&self) -> Box<dyn Iterator<Item = TrainingResult<Batch>> + '_> {
        self.as_slice().batches()
    }
}

/// Deterministic toy batches: relevant candidates draw tokens from the lower half of
/// the vocabulary, distractors from the upper half.
#[cfg(any(test, feature = "mock"))]
pub fn synthetic_batches(
    count: usize,
    batch: usize,
    group: usize,
    seq: usize,
    vocab: u32,
    device: &candle_core::Device,
) -> TrainingResult<Vec<Batch>> {
    let half = (vocab / 2).max(1);
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (state >> 33) as u32
    };

    let mut batches = Vec::with_capacity(count);
    for _ in 0..count {
        let mut ids = Vec::with_capacity(batch * group * seq);
        let mut labels = Vec::with_capacity(batch);
        for _ in 0..batch {
            let positive = next() % group as u32;
            labels.push(positive);
            for candidate in 0..group as u32 {
                for _ in 0..seq {
                    let token = if candidate == positive {
                        next() % half
                    } else {
                        half + next() % (vocab - half).max(1)
                    };
                    ids.push(token);
                }
            }
        }

        let input_ids = Tensor::from_vec(ids, (batch, group, seq), device)?;
        let attention_mask = Tensor::ones((batch, group, seq), DType::U32, device)?;
        let label = Tensor::from_vec(labels, batch, device)?;
        batches.push(Batch::new(input_ids, attention_mask, label, None)?);
    }

    Ok(batches)
}
