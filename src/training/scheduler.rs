use tracing::info;

use crate::constants::{PLATEAU_EPS, PLATEAU_THRESHOLD};

use super::checkpoint::record::PlateauState;

/// Reduce-on-plateau learning-rate schedule in `min` mode.
///
/// A step counts as an improvement when the metric is below
/// `best * (1 - PLATEAU_THRESHOLD)`. Once more than `patience` consecutive steps fail to
/// improve, the learning rate is multiplied by `factor`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateauScheduler {
    factor: f64,
    patience: u64,
    cooldown: u64,
    min_lr: f64,
    best: f64,
    num_bad_epochs: u64,
    cooldown_counter: u64,
    learning_rate: f64,
}

impl PlateauScheduler {
    pub fn new(initial_lr: f64, factor: f64, patience: u64) -> Self {
        Self {
            factor,
            patience,
            cooldown: 0,
            min_lr: 0.0,
            best: f64::INFINITY,
            num_bad_epochs: 0,
            cooldown_counter: 0,
            learning_rate: initial_lr,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Records `metric` and returns the learning rate to use from now on.
    pub fn step(&mut self, metric: f64) -> f64 {
        if metric < self.best * (1.0 - PLATEAU_THRESHOLD) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs > self.patience {
            let reduced = (self.learning_rate * self.factor).max(self.min_lr);
            if self.learning_rate - reduced > PLATEAU_EPS {
                info!(
                    from = self.learning_rate,
                    to = reduced,
                    "Reducing learning rate on plateau"
                );
                self.learning_rate = reduced;
            }
            self.cooldown_counter = self.cooldown;
            self.num_bad_epochs = 0;
        }

        self.learning_rate
    }

    pub fn state(&self) -> PlateauState {
        PlateauState {
            best: self.best,
            num_bad_epochs: self.num_bad_epochs,
            cooldown_counter: self.cooldown_counter,
            learning_rate: self.learning_rate,
        }
    }

    /// Restores counters and the current learning rate; `factor` and `patience` keep
    /// their configured values.
    pub fn load_state(&mut self, state: &PlateauState) {
        self.best = state.best;
        self.num_bad_epochs = state.num_bad_epochs;
        self.cooldown_counter = state.cooldown_counter;
        self.learning_rate = state.learning_rate;
    }
}
