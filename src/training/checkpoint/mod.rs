//! Session persistence inside `logging.save_dir`.
//!
//! The directory holds three things side by side: the rkyv-encoded session checkpoint,
//! the running log and the best model artifact. A session counts as resumable only when
//! the checkpoint and the log both exist.

/// rkyv record types.
pub mod record;

#[cfg(test)]
mod tests;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{from_bytes, to_bytes};
use tracing::{debug, info};

use crate::constants::{
    CHECKPOINT_FILENAME, CHECKPOINT_FORMAT_VERSION, MODEL_CONFIG_FILENAME, TRAIN_LOG_FILENAME,
    WEIGHTS_FILENAME,
};
use crate::model::Backbone;

use super::error::{TrainingError, TrainingResult};

pub use record::{CheckpointRecord, MomentRecord, OptimizerState, PlateauState};

const TEMP_SUFFIX: &str = "tmp";

/// In-memory view of `checkpoint.pth`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub epoch: u64,
    /// Combined loss of `epoch`.
    pub loss: f64,
    pub best_loss: f64,
    pub optimizer: Option<OptimizerState>,
    pub lr_scheduler: Option<PlateauState>,
}

impl SessionState {
    /// State of a session that has not completed any epoch.
    pub fn fresh() -> Self {
        Self {
            epoch: 0,
            loss: f64::INFINITY,
            best_loss: f64::INFINITY,
            optimizer: None,
            lr_scheduler: None,
        }
    }

    fn to_record(&self, include_optimizer_state: bool) -> CheckpointRecord {
        CheckpointRecord {
            format_version: CHECKPOINT_FORMAT_VERSION,
            epoch: self.epoch,
            loss: self.loss,
            best_loss: self.best_loss,
            optimizer: self.optimizer.clone().filter(|_| include_optimizer_state),
            lr_scheduler: self.lr_scheduler.clone().filter(|_| include_optimizer_state),
        }
    }
}

impl From<CheckpointRecord> for SessionState {
    fn from(record: CheckpointRecord) -> Self {
        Self {
            epoch: record.epoch,
            loss: record.loss,
            best_loss: record.best_loss,
            optimizer: record.optimizer,
            lr_scheduler: record.lr_scheduler,
        }
    }
}

/// Reads and writes the files of one session directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILENAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(TRAIN_LOG_FILENAME)
    }

    fn temp_checkpoint_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}", CHECKPOINT_FILENAME, TEMP_SUFFIX))
    }

    /// Creates the session directory if it does not exist.
    pub fn ensure_dir(&self) -> TrainingResult<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| TrainingError::io(&self.dir, e))?;
        }
        Ok(())
    }

    /// `true` when the directory, the checkpoint and the running log all exist.
    ///
    /// A directory holding only an artifact (or only a checkpoint) is treated as a fresh
    /// start.
    pub fn has_checkpoint(&self) -> bool {
        self.dir.is_dir() && self.checkpoint_path().is_file() && self.log_path().is_file()
    }

    /// `true` when a loadable model artifact (config and weights) is present.
    pub fn has_artifact(&self) -> bool {
        self.dir.join(MODEL_CONFIG_FILENAME).is_file() && self.dir.join(WEIGHTS_FILENAME).is_file()
    }

    /// Decodes `checkpoint.pth`. Any failure is reported as a corrupt checkpoint.
    pub fn load(&self) -> TrainingResult<SessionState> {
        let path = self.checkpoint_path();
        let corrupt = |reason: String| TrainingError::CorruptCheckpoint {
            path: path.clone(),
            reason,
        };

        let bytes = fs::read(&path).map_err(|e| corrupt(e.to_string()))?;

        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(&bytes);

        let record = from_bytes::<CheckpointRecord, RkyvError>(&aligned)
            .map_err(|e| corrupt(format!("validation failed: {}", e)))?;

        if record.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {} (expected {})",
                record.format_version, CHECKPOINT_FORMAT_VERSION
            )));
        }

        debug!(
            path = %path.display(),
            epoch = record.epoch,
            has_optimizer = record.optimizer.is_some(),
            "Checkpoint loaded"
        );
        Ok(record.into())
    }

    /// Writes `state` atomically (temp file, fsync, rename).
    ///
    /// With `include_optimizer_state == false` the optimizer and scheduler entries are
    /// written as empty.
    pub fn save(&self, state: &SessionState, include_optimizer_state: bool) -> TrainingResult<()> {
        self.ensure_dir()?;

        let record = state.to_record(include_optimizer_state);
        let temp_path = self.temp_checkpoint_path();
        let final_path = self.checkpoint_path();

        let bytes = to_bytes::<RkyvError>(&record).map_err(|e| {
            TrainingError::io(&final_path, std::io::Error::other(format!("{:?}", e)))
        })?;

        {
            let mut file = File::create(&temp_path).map_err(|e| TrainingError::io(&temp_path, e))?;
            file.write_all(&bytes)
                .and_then(|_| file.sync_all())
                .map_err(|e| TrainingError::io(&temp_path, e))?;
        }

        fs::rename(&temp_path, &final_path).map_err(|e| TrainingError::io(&final_path, e))?;

        debug!(
            epoch = state.epoch,
            with_optimizer = include_optimizer_state,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Writes the model artifact into the session directory.
    pub fn save_artifact<B: Backbone + ?Sized>(&self, model: &B) -> TrainingResult<()> {
        model.save_artifact(&self.dir)?;
        info!(dir = %self.dir.display(), "Best model artifact saved");
        Ok(())
    }

    /// Replaces the model's weights with the artifact stored in the session directory.
    pub fn load_artifact<B: Backbone + ?Sized>(&self, model: &B) -> TrainingResult<()> {
        model.reload_weights(&self.dir)?;
        Ok(())
    }
}
