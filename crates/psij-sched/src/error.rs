//! Error handling for the batch-scheduler engine.

use psij_hal::HalError;
use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur while talking to a batch scheduler.
#[derive(Error, Debug)]
pub enum SchedError {
    /// A scheduler command exited with a non-zero code.
    #[error("Command '{command}' failed with exit code {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// A scheduler command could not be started.
    #[error("Failed to run '{command}': {message}")]
    Spawn { command: String, message: String },

    /// A scheduler command did not finish in time.
    #[error("Command timeout: {0}")]
    Timeout(String),

    /// Scheduler output could not be understood.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Submit script generation failed.
    #[error("Script generation failed: {0}")]
    Script(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error from the job model.
    #[error(transparent)]
    Hal(#[from] HalError),
}

impl SchedError {
    /// Whether retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedError::Spawn { .. } | SchedError::Timeout(_))
    }
}

impl From<SchedError> for HalError {
    fn from(e: SchedError) -> Self {
        match e {
            SchedError::Hal(e) => e,
            SchedError::IoError(e) => HalError::Io(e),
            SchedError::CommandFailed { output, .. } => HalError::submit(output),
            e if e.is_transient() => HalError::transient(e.to_string()),
            e => HalError::submit(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedError::CommandFailed {
            command: "squeue".to_string(),
            exit_code: 1,
            output: "slurm_load_jobs error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command 'squeue' failed with exit code 1: slurm_load_jobs error"
        );

        let err = SchedError::Parse("bad line".to_string());
        assert_eq!(err.to_string(), "Parse error: bad line");
    }

    #[test]
    fn test_conversion_to_hal() {
        let hal: HalError = SchedError::Timeout("sbatch timed out after 60s".into()).into();
        assert!(hal.is_transient());

        let hal: HalError = SchedError::CommandFailed {
            command: "sbatch".into(),
            exit_code: 1,
            output: "invalid partition".into(),
        }
        .into();
        assert!(!hal.is_transient());
        assert_eq!(hal.to_string(), "Submit failed: invalid partition");
    }
}
