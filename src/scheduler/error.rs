//! Error types for the scheduler module

use crate::error::AppError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A batch returned an error
    #[error("Batch execution failed: {0}")]
    BatchFailed(String),

    /// A batch panicked
    #[error("Batch panicked: {0}")]
    BatchPanicked(String),

    /// Work submitted after shutdown
    #[error("Scheduler is shut down")]
    ShutDown,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ConfigurationError(msg) => AppError::Configuration(msg),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<AppError> for SchedulerError {
    fn from(err: AppError) -> Self {
        SchedulerError::BatchFailed(err.to_string())
    }
}
