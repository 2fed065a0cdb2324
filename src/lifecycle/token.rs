use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tokio::signal;
use tracing::{debug, warn};

use super::error::LifecycleResult;

/// Shared stop flag polled by the trainer between batches.
///
/// Clones share the same flag. Cancelling is idempotent and cannot be undone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop.
    pub fn cancel(&self) {
        // AcqRel: Release publishes the stop to is_cancelled(), Acquire reports a prior cancel once
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("Cancellation requested");
        }
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        // Acquire: pairs with the Release in cancel()
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Cancels `token` when the process receives Ctrl+C.
///
/// The listener runs on a dedicated thread with its own single-threaded runtime, so the
/// caller does not need to be async. The thread exits after the first signal.
pub fn install_ctrl_c(token: CancellationToken) -> LifecycleResult<thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let handle = thread::Builder::new()
        .name("ctrl-c-listener".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match signal::ctrl_c().await {
                    Ok(()) => {
                        warn!("Interrupt received, stopping after the current batch");
                        token.cancel();
                    }
                    Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
                }
            });
        })?;

    Ok(handle)
}
