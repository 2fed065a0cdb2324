//! The training loop.
//!
//! One call to [`Trainer::fit`] runs a session inside `save_dir`:
//!
//! 1. Resume from `checkpoint.pth` when the checkpoint and `train.log` both exist,
//!    otherwise start fresh at epoch 0 with a truncated log.
//! 2. For each epoch: train pass, test pass, scheduler step on the combined loss,
//!    checkpoint save, artifact save on strict improvement, periodic validation.
//! 3. If the cancellation token fires, persist the full optimizer and scheduler state
//!    and return [`TrainingOutcome::Interrupted`].


use std::path::PathBuf;
use std::thread::JoinHandle;

use candle_core::{DType, Tensor};
use tracing::{debug, info, warn};

use crate::config::TrainingConfig;
use crate::lifecycle::{CancellationToken, LifecycleResult, install_ctrl_c};
use crate::model::{Backbone, pair_scores};

use super::checkpoint::{CheckpointStore, SessionState};
use super::data::{Batch, BatchSource};
use super::error::{TrainingError, TrainingResult};
use super::loss::compute_loss;
use super::meter::{AverageMeter, hit_rate_proxy};
use super::metrics::{ClassificationMetrics, calculate_metrics};
use super::optimizer::{Optimizer, OptimizerKind, OptimizerSettings, clip_grad_norm};
use super::run_log::RunLog;
use super::scheduler::PlateauScheduler;

/// How a [`Trainer::fit`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingOutcome {
    /// Every epoch up to `total_epoch` ran.
    Completed,
    /// Stopped by the cancellation token; the checkpoint records `epoch`.
    Interrupted { epoch: u64 },
}

/// Summary of one completed epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochRecord {
    pub epoch: u64,
    pub train_loss: f64,
    pub test_loss: f64,
    pub combined_loss: f64,
    /// Learning rate after the scheduler step.
    pub learning_rate: f64,
    pub is_best: bool,
    pub metrics: Option<ClassificationMetrics>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub outcome: TrainingOutcome,
    pub resumed: bool,
    pub start_epoch: u64,
    /// Epochs completed by this call.
    pub epochs: Vec<EpochRecord>,
    pub best_loss: f64,
    /// Last epoch of this call that improved on the best loss.
    pub best_epoch: Option<u64>,
}

impl TrainingReport {
    pub fn is_interrupted(&self) -> bool {
        matches!(self.outcome, TrainingOutcome::Interrupted { .. })
    }
}

/// Per-session mutable state threaded through the epoch loop.
struct Session {
    optimizer: Optimizer,
    scheduler: PlateauScheduler,
    log: RunLog,
    best_loss: f64,
    last_loss: Option<f64>,
}

/// Drives a [`Backbone`] through training, evaluation and checkpointing.
pub struct Trainer<B: Backbone> {
    model: B,
    config: TrainingConfig,
    store: CheckpointStore,
    cancel: CancellationToken,
}

impl<B: Backbone> Trainer<B> {
    pub fn new(model: B, config: TrainingConfig, save_dir: impl Into<PathBuf>) -> TrainingResult<Self> {
        config.validate().map_err(|e| TrainingError::InvalidSetting {
            reason: e.to_string(),
        })?;

        Ok(Self {
            model,
            config,
            store: CheckpointStore::new(save_dir),
            cancel: CancellationToken::new(),
        })
    }

    /// Uses `token` instead of the trainer's own cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle that stops [`fit`](Self::fit) between batches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops [`fit`](Self::fit) when the process receives Ctrl+C.
    pub fn cancel_on_ctrl_c(&self) -> LifecycleResult<JoinHandle<()>> {
        install_ctrl_c(self.cancel.clone())
    }

    pub fn model(&self) -> &B {
        &self.model
    }

    pub fn into_model(self) -> B {
        self.model
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Runs (or resumes) the session.
    ///
    /// `validation` is evaluated on epochs divisible by `eval_interval`.
    pub fn fit(
        &mut self,
        train: &dyn BatchSource,
        test: &dyn BatchSource,
        validation: Option<&dyn BatchSource>,
    ) -> TrainingResult<TrainingReport> {
        let (mut session, start_epoch, resumed) = self.open_session()?;
        let class_weights = self.class_weights()?;

        let mut epochs = Vec::new();
        let mut best_epoch = None;

        for epoch in start_epoch..self.config.total_epoch {
            info!(epoch, lr = session.optimizer.learning_rate(), "Starting epoch");

            let Some(train_loss) =
                self.train_one_epoch(epoch, train, &mut session, class_weights.as_ref())?
            else {
                return self.interrupt(epoch, session, start_epoch, resumed, epochs, best_epoch);
            };

            let Some(test_loss) = self.test_epoch(epoch, test, &session.log, class_weights.as_ref())?
            else {
                return self.interrupt(epoch, session, start_epoch, resumed, epochs, best_epoch);
            };

            let combined = train_loss + test_loss;
            session.last_loss = Some(combined);

            let learning_rate = session.scheduler.step(combined);
            session.optimizer.set_learning_rate(learning_rate);

            let is_best = combined < session.best_loss;
            session.best_loss = session.best_loss.min(combined);

            let state = SessionState {
                epoch,
                loss: combined,
                best_loss: session.best_loss,
                optimizer: None,
                lr_scheduler: None,
            };
            self.store.save(&state, false)?;

            if is_best {
                self.store.save_artifact(&self.model)?;
                best_epoch = Some(epoch);
            }

            let mut metrics = None;
            if epoch % self.config.eval_interval == 0 {
                if let Some(validation) = validation {
                    match self.eval_epoch(epoch, validation, &session.log)? {
                        Some(m) => metrics = Some(m),
                        None => {
                            return self.interrupt(
                                epoch,
                                session,
                                start_epoch,
                                resumed,
                                epochs,
                                best_epoch,
                            );
                        }
                    }
                }
            }

            info!(
                epoch,
                train_loss,
                test_loss,
                combined,
                best_loss = session.best_loss,
                is_best,
                "Epoch complete"
            );

            epochs.push(EpochRecord {
                epoch,
                train_loss,
                test_loss,
                combined_loss: combined,
                learning_rate,
                is_best,
                metrics,
            });

            if self.cancel.is_cancelled() {
                return self.interrupt(epoch, session, start_epoch, resumed, epochs, best_epoch);
            }
        }

        info!(best_loss = session.best_loss, "Training complete");
        Ok(TrainingReport {
            outcome: TrainingOutcome::Completed,
            resumed,
            start_epoch,
            epochs,
            best_loss: session.best_loss,
            best_epoch,
        })
    }

    /// Scores every candidate of `batch`, returning `[batch, group]`.
    pub fn forward_batch(&self, batch: &Batch) -> TrainingResult<Tensor> {
        let (batch_size, group, _) = batch.dims()?;
        let (ids, mask) = batch.flat_inputs()?;
        let device = self.model.device();

        let logits = self
            .model
            .forward(&ids.to_device(device)?, None, &mask.to_device(device)?)?;
        let scores = pair_scores(&logits)?;
        Ok(scores.reshape((batch_size, group))?)
    }

    /// Classification metrics of `source` (argmax over each group against its label).
    pub fn evaluate(&self, source: &dyn BatchSource) -> TrainingResult<ClassificationMetrics> {
        let (predicted, truth) = self
            .collect_predictions(source, false)?
            .ok_or(TrainingError::EmptySource { pass: "validation" })?;
        calculate_metrics(&predicted, &truth)
    }

    fn open_session(&self) -> TrainingResult<(Session, u64, bool)> {
        let kind = OptimizerKind::from_name(&self.config.optimizer_name);
        let mut optimizer = Optimizer::new(
            kind,
            self.model.named_vars()?,
            OptimizerSettings::new(self.config.lr, self.config.weight_decay),
        )?;
        let mut scheduler =
            PlateauScheduler::new(self.config.lr, self.config.factor, self.config.patience);

        if self.store.has_checkpoint() {
            let state = self.store.load()?;

            if self.store.has_artifact() {
                self.store.load_artifact(&self.model)?;
            } else {
                warn!(
                    dir = %self.store.dir().display(),
                    "No model artifact to resume from, continuing with current weights"
                );
            }

            if let Some(optimizer_state) = &state.optimizer {
                optimizer.load_state(optimizer_state)?;
            }
            if let Some(scheduler_state) = &state.lr_scheduler {
                scheduler.load_state(scheduler_state);
                optimizer.set_learning_rate(scheduler.learning_rate());
            }

            let start_epoch = state.epoch + 1;
            info!(
                start_epoch,
                best_loss = state.best_loss,
                restored_optimizer = state.optimizer.is_some(),
                "Resuming training session"
            );

            let session = Session {
                optimizer,
                scheduler,
                log: RunLog::open(self.store.log_path()),
                best_loss: state.best_loss,
                last_loss: None,
            };
            Ok((session, start_epoch, true))
        } else {
            self.store.ensure_dir()?;
            info!(dir = %self.store.dir().display(), "Starting fresh training session");

            let session = Session {
                optimizer,
                scheduler,
                log: RunLog::create(self.store.log_path())?,
                best_loss: f64::INFINITY,
                last_loss: None,
            };
            Ok((session, 0, false))
        }
    }

    fn class_weights(&self) -> TrainingResult<Option<Tensor>> {
        match &self.config.class_weights {
            Some(weights) => Ok(Some(Tensor::from_slice(
                weights.as_slice(),
                weights.len(),
                self.model.device(),
            )?)),
            None => Ok(None),
        }
    }

    fn batch_loss(&self, batch: &Batch, class_weights: Option<&Tensor>) -> TrainingResult<Tensor> {
        let device = self.model.device();
        let scores = self.forward_batch(batch)?;
        let label = batch.label.to_device(device)?;
        let mask = match &batch.mask {
            Some(mask) => Some(mask.to_device(device)?),
            None => None,
        };
        compute_loss(&scores, &label, mask.as_ref(), class_weights)
    }

    /// Returns `None` when cancelled before the pass finished.
    fn train_one_epoch(
        &self,
        epoch: u64,
        source: &dyn BatchSource,
        session: &mut Session,
        class_weights: Option<&Tensor>,
    ) -> TrainingResult<Option<f64>> {
        let mut total_loss = AverageMeter::new();
        let mut hit_rate = AverageMeter::new();

        for (batch_idx, batch) in source.batches().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let batch = batch?;

            let loss = self.batch_loss(&batch, class_weights)?;
            let mut grads = loss.backward()?;
            let grad_norm = clip_grad_norm(
                &mut grads,
                session.optimizer.vars(),
                self.config.clip_max_norm,
            )?;
            session.optimizer.step(&grads)?;

            let value = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
            total_loss.update(value);
            if let Some(avg) = total_loss.average() {
                hit_rate.update(hit_rate_proxy(avg));
            }

            debug!(epoch, batch = batch_idx, loss = value, grad_norm, "Train batch");
        }

        let avg = total_loss
            .average()
            .ok_or(TrainingError::EmptySource { pass: "train" })?;
        let avg_hit_rate = hit_rate.average().unwrap_or(0.0);

        session.log.append(&format!(
            "Train Epoch: {}, total_loss: {:.4}, average_hit_rate: {:.4}",
            epoch, avg, avg_hit_rate
        ))?;
        info!(epoch, total_loss = avg, average_hit_rate = avg_hit_rate, "Train pass");
        Ok(Some(avg))
    }

    /// Returns `None` when cancelled before the pass finished.
    fn test_epoch(
        &self,
        epoch: u64,
        source: &dyn BatchSource,
        log: &RunLog,
        class_weights: Option<&Tensor>,
    ) -> TrainingResult<Option<f64>> {
        let mut total_loss = AverageMeter::new();
        let mut hit_rate = AverageMeter::new();

        for batch in source.batches() {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let batch = batch?;

            let loss = self.batch_loss(&batch, class_weights)?.detach();
            total_loss.update(loss.to_dtype(DType::F64)?.to_scalar::<f64>()?);
        }

        let avg = total_loss
            .average()
            .ok_or(TrainingError::EmptySource { pass: "test" })?;
        hit_rate.update(hit_rate_proxy(avg));
        let avg_hit_rate = hit_rate.average().unwrap_or(0.0);

        log.append(&format!(
            "Test Epoch: {}, total_loss: {:.4}, average_hit_rate: {:.4}",
            epoch, avg, avg_hit_rate
        ))?;
        info!(epoch, total_loss = avg, average_hit_rate = avg_hit_rate, "Test pass");
        Ok(Some(avg))
    }

    /// Returns `None` when cancelled before the pass finished.
    fn eval_epoch(
        &self,
        epoch: u64,
        source: &dyn BatchSource,
        log: &RunLog,
    ) -> TrainingResult<Option<ClassificationMetrics>> {
        let Some((predicted, truth)) = self.collect_predictions(source, true)? else {
            return Ok(None);
        };
        if truth.is_empty() {
            return Err(TrainingError::EmptySource { pass: "validation" });
        }

        let metrics = calculate_metrics(&predicted, &truth)?;
        let report = metrics.report(epoch);
        log.append(&report)?;
        info!(
            epoch,
            accuracy = metrics.accuracy,
            f1 = metrics.f1,
            "Validation pass"
        );
        Ok(Some(metrics))
    }

    fn collect_predictions(
        &self,
        source: &dyn BatchSource,
        cancellable: bool,
    ) -> TrainingResult<Option<(Vec<u32>, Vec<u32>)>> {
        let mut predicted = Vec::new();
        let mut truth = Vec::new();

        for batch in source.batches() {
            if cancellable && self.cancel.is_cancelled() {
                return Ok(None);
            }
            let batch = batch?;

            let scores = self.forward_batch(&batch)?.detach();
            predicted.extend(scores.argmax(1)?.to_vec1::<u32>()?);
            truth.extend(batch.labels()?);
        }

        if !cancellable && truth.is_empty() {
            return Ok(None);
        }
        Ok(Some((predicted, truth)))
    }

    fn interrupt(
        &self,
        epoch: u64,
        session: Session,
        start_epoch: u64,
        resumed: bool,
        epochs: Vec<EpochRecord>,
        best_epoch: Option<u64>,
    ) -> TrainingResult<TrainingReport> {
        let state = SessionState {
            epoch,
            loss: session.last_loss.unwrap_or(session.best_loss),
            best_loss: session.best_loss,
            optimizer: Some(session.optimizer.state()?),
            lr_scheduler: Some(session.scheduler.state()),
        };
        self.store.save(&state, true)?;

        warn!(
            epoch,
            checkpoint = %self.store.checkpoint_path().display(),
            "Training interrupted, session state saved"
        );

        Ok(TrainingReport {
            outcome: TrainingOutcome::Interrupted { epoch },
            resumed,
            start_epoch,
            epochs,
            best_loss: session.best_loss,
            best_epoch,
        })
    }
}
