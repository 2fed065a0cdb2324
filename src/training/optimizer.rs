//! Adam / AdamW over named parameters, with exportable moment state.

use std::fmt;

use candle_core::backprop::GradStore;
use candle_core::{DType, Tensor, Var};
use tracing::{debug, warn};

use super::checkpoint::record::{MomentRecord, OptimizerState};
use super::error::{TrainingError, TrainingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    /// L2 penalty folded into the gradient.
    Adam,
    /// Decoupled weight decay.
    AdamW,
}

impl OptimizerKind {
    /// Maps a configured name onto an optimizer; unknown names fall back to Adam.
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            n if n.eq_ignore_ascii_case("adamw") => OptimizerKind::AdamW,
            n if n.eq_ignore_ascii_case("adam") => OptimizerKind::Adam,
            other => {
                warn!(optimizer = other, "Unknown optimizer, falling back to Adam");
                OptimizerKind::Adam
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Adam => "Adam",
            OptimizerKind::AdamW => "AdamW",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl OptimizerSettings {
    pub fn new(learning_rate: f64, weight_decay: f64) -> Self {
        Self {
            learning_rate,
            weight_decay,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

struct ParamState {
    name: String,
    var: Var,
    first: Tensor,
    second: Tensor,
}

pub struct Optimizer {
    kind: OptimizerKind,
    settings: OptimizerSettings,
    params: Vec<ParamState>,
    step: u64,
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer")
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .field("params", &self.params.len())
            .field("step", &self.step)
            .finish()
    }
}

impl Optimizer {
    /// Creates zeroed moments for every parameter.
    pub fn new(
        kind: OptimizerKind,
        vars: Vec<(String, Var)>,
        settings: OptimizerSettings,
    ) -> TrainingResult<Self> {
        let params = vars
            .into_iter()
            .map(|(name, var)| {
                let first = var.as_tensor().zeros_like()?;
                let second = var.as_tensor().zeros_like()?;
                Ok(ParamState {
                    name,
                    var,
                    first,
                    second,
                })
            })
            .collect::<TrainingResult<Vec<_>>>()?;

        debug!(kind = %kind, params = params.len(), "Optimizer created");
        Ok(Self {
            kind,
            settings,
            params,
            step: 0,
        })
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn learning_rate(&self) -> f64 {
        self.settings.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.settings.learning_rate = lr;
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Parameters this optimizer updates.
    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.params.iter().map(|p| &p.var)
    }

    /// Applies one update from `grads`. Parameters without a gradient are left alone.
    pub fn step(&mut self, grads: &GradStore) -> TrainingResult<()> {
        self.step += 1;

        let OptimizerSettings {
            learning_rate: lr,
            weight_decay: wd,
            beta1,
            beta2,
            eps,
        } = self.settings;
        let scale_m = 1.0 / (1.0 - beta1.powf(self.step as f64));
        let scale_v = 1.0 / (1.0 - beta2.powf(self.step as f64));

        for param in self.params.iter_mut() {
            let Some(grad) = grads.get(param.var.as_tensor()) else {
                continue;
            };
            // Moments outlive the step, so nothing below may record autograd ops.
            let theta = param.var.as_tensor().detach();
            let grad = grad.detach();

            let grad = match self.kind {
                OptimizerKind::Adam if wd > 0.0 => (grad + (&theta * wd)?)?,
                _ => grad,
            };

            let first = ((&param.first * beta1)? + (&grad * (1.0 - beta1))?)?;
            let second = ((&param.second * beta2)? + (grad.sqr()? * (1.0 - beta2))?)?;

            let m_hat = (&first * scale_m)?;
            let v_hat = (&second * scale_v)?;
            let update = (m_hat / (v_hat.sqrt()? + eps)?)?;

            let base = match self.kind {
                OptimizerKind::AdamW if wd > 0.0 => (&theta * (1.0 - lr * wd))?,
                _ => theta,
            };
            let next = (base - (update * lr)?)?;

            param.var.set(&next)?;
            param.first = first;
            param.second = second;
        }

        Ok(())
    }

    /// Snapshot of moments and step count for the checkpoint.
    pub fn state(&self) -> TrainingResult<OptimizerState> {
        let moments = self
            .params
            .iter()
            .map(|p| {
                Ok(MomentRecord {
                    name: p.name.clone(),
                    shape: p.first.dims().iter().map(|d| *d as u64).collect(),
                    first: p.first.flatten_all()?.to_dtype(DType::F32)?.to_vec1()?,
                    second: p.second.flatten_all()?.to_dtype(DType::F32)?.to_vec1()?,
                })
            })
            .collect::<TrainingResult<Vec<_>>>()?;

        Ok(OptimizerState {
            kind: self.kind.as_str().to_string(),
            step: self.step,
            learning_rate: self.settings.learning_rate,
            moments,
        })
    }

    /// Restores a snapshot taken by [`Optimizer::state`].
    ///
    /// Every parameter must have a moment record of matching shape.
    pub fn load_state(&mut self, state: &OptimizerState) -> TrainingResult<()> {
        if !state.kind.eq_ignore_ascii_case(self.kind.as_str()) {
            warn!(
                saved = %state.kind,
                configured = %self.kind,
                "Restoring moments saved by a different optimizer"
            );
        }

        for param in self.params.iter_mut() {
            let record = state
                .moments
                .iter()
                .find(|m| m.name == param.name)
                .ok_or_else(|| {
                    TrainingError::shape(format!("no optimizer state for '{}'", param.name))
                })?;

            let shape: Vec<usize> = record.shape.iter().map(|d| *d as usize).collect();
            if shape != param.first.dims() {
                return Err(TrainingError::shape(format!(
                    "optimizer state for '{}' has shape {:?}, parameter is {:?}",
                    param.name,
                    shape,
                    param.first.dims()
                )));
            }

            let device = param.var.device();
            let dtype = param.var.dtype();
            param.first = Tensor::from_vec(record.first.clone(), shape.as_slice(), device)?
                .to_dtype(dtype)?;
            param.second = Tensor::from_vec(record.second.clone(), shape.as_slice(), device)?
                .to_dtype(dtype)?;
        }

        self.step = state.step;
        self.settings.learning_rate = state.learning_rate;
        debug!(step = self.step, lr = state.learning_rate, "Optimizer state restored");
        Ok(())
    }
}

/// Rescales gradients in place so their global L2 norm is at most `max_norm`.
///
/// Returns the norm measured before clipping. A non-positive `max_norm` disables
/// clipping.
pub fn clip_grad_norm<'a>(
    grads: &mut GradStore,
    vars: impl Iterator<Item = &'a Var>,
    max_norm: f64,
) -> TrainingResult<f64> {
    let vars: Vec<&Var> = vars.collect();

    let mut sum_sq = 0.0f64;
    for var in &vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            sum_sq += grad
                .sqr()?
                .sum_all()?
                .to_dtype(DType::F64)?
                .to_scalar::<f64>()?;
        }
    }
    let total_norm = sum_sq.sqrt();

    if max_norm <= 0.0 || total_norm <= max_norm {
        return Ok(total_norm);
    }

    let coef = max_norm / (total_norm + 1e-6);
    for var in &vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let clipped = (grad * coef)?;
            grads.insert(var.as_tensor(), clipped);
        }
    }

    Ok(total_norm)
}
