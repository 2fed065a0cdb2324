//! Training loop, checkpointing and the pieces it is built from.
//!
//! - [`trainer`] runs epochs, evaluates, checkpoints and handles interruption.
//! - [`checkpoint`] persists session state next to the best model artifact.
//! - [`loss`], [`optimizer`] and [`scheduler`] implement the optimization step.
//! - [`meter`] and [`metrics`] aggregate what gets logged.

pub mod checkpoint;
pub mod data;
pub mod error;
pub mod loss;
pub mod meter;
pub mod metrics;
pub mod optimizer;
pub mod run_log;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{CheckpointStore, SessionState};
#[cfg(any(test, feature = "mock"))]
pub use data::synthetic_batches;
pub use data::{Batch, BatchSource};
pub use error::{TrainingError, TrainingResult};
pub use loss::compute_loss;
pub use meter::{AverageMeter, hit_rate_proxy};
pub use metrics::{ClassificationMetrics, calculate_metrics};
pub use optimizer::{Optimizer, OptimizerKind, OptimizerSettings, clip_grad_norm};
pub use run_log::RunLog;
pub use scheduler::PlateauScheduler;
pub use trainer::{EpochRecord, Trainer, TrainingOutcome, TrainingReport};
