use std::collections::BTreeSet;
use std::fmt::Write;

use super::error::{TrainingError, TrainingResult};

/// Classification quality of one validation pass.
///
/// Precision, recall and F1 are macro averages over every class that appears in either
/// the predictions or the ground truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ClassificationMetrics {
    /// Multi-line report written to the running log after a validation pass.
    pub fn report(&self, epoch: u64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Eval Epoch: {}", epoch);
        let _ = writeln!(out, "accuracy: {:.4}", self.accuracy);
        let _ = writeln!(out, "precision: {:.4}", self.precision);
        let _ = writeln!(out, "recall: {:.4}", self.recall);
        let _ = write!(out, "f1_score: {:.4}", self.f1);
        out
    }
}

pub fn calculate_metrics(predicted: &[u32], truth: &[u32]) -> TrainingResult<ClassificationMetrics> {
    if predicted.len() != truth.len() {
        return Err(TrainingError::shape(format!(
            "{} predictions for {} labels",
            predicted.len(),
            truth.len()
        )));
    }
    if predicted.is_empty() {
        return Err(TrainingError::shape("no predictions to evaluate"));
    }

    let total = truth.len() as f64;
    let correct = predicted.iter().zip(truth).filter(|(p, t)| p == t).count();

    let classes: BTreeSet<u32> = predicted.iter().chain(truth).copied().collect();

    let mut precision_sum = 0.0;
    let mut recall_sum = 0.0;
    let mut f1_sum = 0.0;

    for class in &classes {
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        for (p, t) in predicted.iter().zip(truth) {
            match (p == class, t == class) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (false, false) => {}
            }
        }

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        precision_sum += precision;
        recall_sum += recall;
        f1_sum += f1;
    }

    let n = classes.len() as f64;
    Ok(ClassificationMetrics {
        accuracy: correct as f64 / total,
        precision: precision_sum / n,
        recall: recall_sum / n,
        f1: f1_sum / n,
    })
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}
