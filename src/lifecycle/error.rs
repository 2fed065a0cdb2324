use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("failed to start signal listener: {0}")]
    SignalListener(#[from] std::io::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
