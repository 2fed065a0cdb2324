//! On-disk layout of `checkpoint.pth`.

use rkyv::{Archive, Deserialize, Serialize};

/// Session state persisted after every epoch and on interruption.
///
/// Stored as `rkyv` bytes. `optimizer` and `lr_scheduler` are `None` in the per-epoch
/// checkpoint and populated by the interruption path.
#[derive(Archive, Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct CheckpointRecord {
    /// Layout version, compared against `CHECKPOINT_FORMAT_VERSION` on load.
    pub format_version: u32,
    /// Last epoch the record belongs to.
    pub epoch: u64,
    /// Combined (train + test) loss of that epoch.
    pub loss: f64,
    /// Lowest combined loss seen so far.
    pub best_loss: f64,
    pub optimizer: Option<OptimizerState>,
    pub lr_scheduler: Option<PlateauState>,
}

/// Adam / AdamW moments, keyed by parameter name.
#[derive(Archive, Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct OptimizerState {
    /// `Adam` or `AdamW`.
    pub kind: String,
    /// Number of optimizer steps taken (drives bias correction).
    pub step: u64,
    pub learning_rate: f64,
    pub moments: Vec<MomentRecord>,
}

#[derive(Archive, Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct MomentRecord {
    pub name: String,
    pub shape: Vec<u64>,
    /// First moment, row-major.
    pub first: Vec<f32>,
    /// Second moment, row-major.
    pub second: Vec<f32>,
}

/// Reduce-on-plateau bookkeeping.
#[derive(Archive, Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct PlateauState {
    pub best: f64,
    pub num_bad_epochs: u64,
    pub cooldown_counter: u64,
    pub learning_rate: f64,
}
