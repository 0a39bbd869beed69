//! Point-in-time job status records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::JobState;

/// Metadata attached to a status by the executor that produced it.
pub type StatusMetadata = serde_json::Map<String, serde_json::Value>;

/// Details about a job's transition into a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// The state entered.
    pub state: JobState,
    /// When the transition happened.
    pub time: DateTime<Utc>,
    /// Optional message, typically an error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Exit code of the job, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Executor-specific metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StatusMetadata>,
}

impl JobStatus {
    /// A status for `state` timestamped now.
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            time: Utc::now(),
            message: None,
            exit_code: None,
            metadata: None,
        }
    }

    /// Set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the exit code.
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Set the timestamp.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata
            .get_or_insert_with(StatusMetadata::new)
            .insert(key.into(), value.into());
        self
    }

    /// Whether the state of this status is final.
    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobStatus[{}, time={}", self.state, self.time.to_rfc3339())?;
        if let Some(message) = &self.message {
            write!(f, ", message={message}")?;
        }
        if let Some(exit_code) = self.exit_code {
            write!(f, ", exit_code={exit_code}")?;
        }
        if let Some(metadata) = &self.metadata {
            write!(f, ", meta={}", serde_json::Value::Object(metadata.clone()))?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_builder() {
        let status = JobStatus::new(JobState::Failed)
            .with_message("boom")
            .with_exit_code(3)
            .with_metadata("native_id", "42");

        assert!(status.is_final());
        assert_eq!(status.message.as_deref(), Some("boom"));
        assert_eq!(status.exit_code, Some(3));
        assert_eq!(
            status.metadata.as_ref().and_then(|m| m.get("native_id")),
            Some(&serde_json::json!("42"))
        );
    }

    #[test]
    fn test_status_display() {
        let status = JobStatus::new(JobState::Completed).with_exit_code(0);
        let s = status.to_string();
        assert!(s.starts_with("JobStatus[COMPLETED"));
        assert!(s.ends_with(", exit_code=0]"));
    }
}
