use std::sync::atomic::{AtomicUsize, Ordering};

use candle_core::Device;
use crossrank::config::TrainingConfig;
use crossrank::lifecycle::CancellationToken;
use crossrank::model::MockCrossEncoder;
use crossrank::training::{Batch, BatchSource, TrainingResult, synthetic_batches};

pub const VOCAB: u32 = 16;
pub const HIDDEN: usize = 4;

pub fn mock_model() -> MockCrossEncoder {
    MockCrossEncoder::new(VOCAB as usize, HIDDEN, &Device::Cpu).expect("mock model")
}

/// `count` batches of 2 queries with 3 candidates of 4 tokens each.
pub fn batches(count: usize) -> Vec<Batch> {
    synthetic_batches(count, 2, 3, 4, VOCAB, &Device::Cpu).expect("synthetic batches")
}

pub fn training_config(total_epoch: u64) -> TrainingConfig {
    TrainingConfig {
        lr: 0.05,
        total_epoch,
        eval_interval: 1,
        patience: 2,
        ..Default::default()
    }
}

pub fn read_log(dir: &std::path::Path) -> String {
    std::fs::read_to_string(dir.join(crossrank::constants::TRAIN_LOG_FILENAME))
        .expect("read train.log")
}

/// Batch source that cancels `token` once `after` batches have been served.
pub struct InterruptingSource {
    batches: Vec<Batch>,
    token: CancellationToken,
    after: usize,
    served: AtomicUsize,
}

impl InterruptingSource {
    pub fn new(batches: Vec<Batch>, token: CancellationToken, after: usize) -> Self {
        Self {
            batches,
            token,
            after,
            served: AtomicUsize::new(0),
        }
    }
}

impl BatchSource for InterruptingSource {
    fn batches(&self) -> Box<dyn Iterator<Item = TrainingResult<Batch>> + '_> {
        Box::new(self.batches.iter().cloned().map(move |batch| {
            if self.served.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.token.cancel();
            }
            Ok(batch)
        }))
    }
}
