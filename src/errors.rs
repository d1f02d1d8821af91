//! Error types for the resource pool and its size manager

use crate::member::PoolId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool has been disposed")]
    Disposed,

    #[error("Gave up acquiring a resource after {attempts} attempts")]
    MaxRetriesReached { attempts: usize },

    #[error("Resource creation failed: {0}")]
    CreationFailed(String),

    #[error("Pool is at maximum capacity ({0} resources)")]
    PoolFull(usize),

    #[error("Pool {0} is already managed")]
    AlreadyManaged(PoolId),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No Tokio runtime available to run the size manager")]
    RuntimeUnavailable,

    #[error("Metrics export failed: {0}")]
    Metrics(String),
}

impl PoolError {
    /// Whether the acquire loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::CreationFailed(_) | PoolError::PoolFull(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
