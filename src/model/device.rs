use std::fmt;
use std::str::FromStr;

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::ModelError;

/// Requested compute device, as written in the `model.device` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DevicePreference {
    #[default]
    Cpu,
    Cuda(usize),
    Metal(usize),
    /// First available GPU backend, else CPU.
    Auto,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (kind, ordinal) = match lower.split_once(':') {
            Some((kind, idx)) => {
                let idx = idx
                    .parse::<usize>()
                    .map_err(|_| format!("invalid device ordinal in '{}'", s))?;
                (kind.to_string(), idx)
            }
            None => (lower.clone(), 0),
        };

        match kind.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(ordinal)),
            "metal" | "mps" => Ok(Self::Metal(ordinal)),
            "auto" => Ok(Self::Auto),
            _ => Err(format!("Unknown device: {}", s)),
        }
    }
}

impl TryFrom<String> for DevicePreference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DevicePreference> for String {
    fn from(value: DevicePreference) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Cuda(idx) => write!(f, "cuda:{}", idx),
            DevicePreference::Metal(idx) => write!(f, "metal:{}", idx),
            DevicePreference::Auto => write!(f, "auto"),
        }
    }
}

/// Selects the compute device for `preference` (falls back to CPU).
///
/// A GPU request that cannot be satisfied, either because the backend was not
/// compiled in or because no device answered, degrades to CPU with a warning.
pub fn select_device(preference: DevicePreference) -> Result<Device, ModelError> {
    let mut failures: Vec<String> = Vec::new();

    let selected = match preference {
        DevicePreference::Cpu => {
            debug!("CPU device requested");
            return Ok(Device::Cpu);
        }
        DevicePreference::Cuda(ordinal) => try_cuda(ordinal, &mut failures),
        DevicePreference::Metal(ordinal) => try_metal(ordinal, &mut failures),
        DevicePreference::Auto => {
            if cfg!(feature = "metal") {
                try_metal(0, &mut failures)
            } else if cfg!(feature = "cuda") {
                try_cuda(0, &mut failures)
            } else {
                None
            }
        }
    };

    if let Some(device) = selected {
        return Ok(device);
    }

    let reason = if !cfg!(any(feature = "metal", feature = "cuda")) {
        "no GPU backend compiled".to_string()
    } else if failures.is_empty() {
        "no GPU device available".to_string()
    } else {
        failures.join("; ")
    };

    warn!(reason = %reason, requested = %preference, "Falling back to CPU device");
    Ok(Device::Cpu)
}

fn try_cuda(ordinal: usize, failures: &mut Vec<String>) -> Option<Device> {
    match Device::new_cuda(ordinal) {
        Ok(device) => {
            info!(ordinal, "Using CUDA GPU acceleration");
            Some(device)
        }
        Err(e) => {
            let msg = e.to_string();
            warn!(error = %msg, "CUDA device unavailable");
            failures.push(format!("cuda failed: {msg}"));
            None
        }
    }
}

fn try_metal(ordinal: usize, failures: &mut Vec<String>) -> Option<Device> {
    match Device::new_metal(ordinal) {
        Ok(device) => {
            info!(ordinal, "Using Metal GPU acceleration");
            Some(device)
        }
        Err(e) => {
            let msg = e.to_string();
            warn!(error = %msg, "Metal device unavailable");
            failures.push(format!("metal failed: {msg}"));
            None
        }
    }
}
