//! Cooperative cancellation for long-running training sessions.

pub mod error;
pub mod token;

#[cfg(test)]
mod tests;

pub use error::{LifecycleError, LifecycleResult};
pub use token::{CancellationToken, install_ctrl_c};
