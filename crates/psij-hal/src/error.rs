//! Error types for the HAL crate.

use thiserror::Error;

/// Errors surfaced synchronously by executors and jobs.
///
/// Anything detected after `submit()` has returned is reported as a
/// `Failed` job status instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HalError {
    /// The job specification cannot be used. Resubmitting the same job
    /// will fail the same way.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// The request could not be sent to the backend.
    ///
    /// `transient` hints that retrying later may succeed. This error never
    /// implies that the job reached the backend.
    #[error("Submit failed: {message}")]
    Submit { message: String, transient: bool },

    /// The job was never submitted to an executor.
    #[error("Job {0} is not bound to an executor")]
    NotBound(String),

    /// The job is already bound to an executor.
    #[error("Job {0} is already bound to an executor")]
    AlreadyBound(String),

    /// The job is in a state that does not allow the requested operation.
    #[error("Invalid job state: expected {expected}, found {found}")]
    InvalidState { expected: String, found: String },

    /// No executor registered under the given name/version.
    #[error("Unknown executor: {0}")]
    UnknownExecutor(String),

    /// No launcher registered under the given name/version.
    #[error("Unknown launcher: {0}")]
    UnknownLauncher(String),

    /// Malformed version or version constraint.
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HalError {
    /// A non-transient submit error.
    pub fn submit(message: impl Into<String>) -> Self {
        HalError::Submit {
            message: message.into(),
            transient: false,
        }
    }

    /// A submit error that may succeed if retried.
    pub fn transient(message: impl Into<String>) -> Self {
        HalError::Submit {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, HalError::Submit { transient: true, .. })
    }
}

/// Result type for HAL operations.
pub type HalResult<T> = Result<T, HalError>;
