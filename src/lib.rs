//! Crossrank library crate (used by the binary and integration tests).
//!
//! # Public API Surface
//!
//! ## Training
//! - [`Trainer`] - Epoch loop with resume, best-artifact tracking and interruption
//! - [`CheckpointStore`], [`SessionState`] - On-disk session state
//! - [`Optimizer`], [`PlateauScheduler`], [`compute_loss`] - Optimization pieces
//! - [`Batch`], [`BatchSource`] - Grouped (query, documents) batches
//!
//! ## Scoring
//! - [`Reranker`] - Scores documents against a query with a trained artifact
//!
//! ## Models
//! - [`Backbone`] - Trainable sequence-classification network
//! - [`CrossEncoder`], [`ModelType`] - BERT / RoBERTa cross-encoders
//!
//! ## Test/Mock Support
//! Mock implementations are available behind `#[cfg(any(test, feature = "mock"))]`.

pub mod config;
pub mod constants;
pub mod lifecycle;
pub mod model;
pub mod scoring;
pub mod training;

pub use config::{Config, ConfigError, LoggingConfig, ModelSettings, TrainingConfig};
pub use lifecycle::{CancellationToken, LifecycleError, LifecycleResult, install_ctrl_c};
#[cfg(any(test, feature = "mock"))]
pub use model::{MockCrossEncoder, word_tokenizer};
pub use model::{
    Backbone, CrossEncoder, DevicePreference, ModelError, ModelType, build_model, load_artifact,
    pair_scores, select_device,
};
pub use scoring::{Reranker, ScoringError};
#[cfg(any(test, feature = "mock"))]
pub use training::synthetic_batches;
pub use training::{
    Batch, BatchSource, CheckpointStore, ClassificationMetrics, EpochRecord, Optimizer,
    OptimizerKind, PlateauScheduler, SessionState, Trainer, TrainingError, TrainingOutcome,
    TrainingReport, TrainingResult, compute_loss,
};
