//! Job state vocabulary.
//!
//! The job state machine:
//!
//! ```text
//!   New ──→ Queued ──→ Active ──→ Completed
//!    │         │          │
//!    └─────────┴──────────┴──→ Failed | Canceled
//! ```
//!
//! `Completed` is only reached through `Active`. `Failed` and `Canceled`
//! can be entered from any non-final state.
//!
//! States are ordered by an integer level. The three final states share the
//! top level and are mutually incomparable, which makes
//! [`JobState::is_greater_than`] a strict *partial* order.

use serde::{Deserialize, Serialize};

/// The state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Created, not yet submitted.
    New,
    /// Accepted by a backend, not yet running.
    Queued,
    /// Running.
    Active,
    /// Finished with a zero exit code.
    Completed,
    /// Finished unsuccessfully, or the backend failed to handle the job.
    Failed,
    /// Canceled through `cancel()`.
    Canceled,
}

impl JobState {
    /// All states, in declaration order.
    pub const ALL: [JobState; 6] = [
        JobState::New,
        JobState::Queued,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Canceled,
    ];

    /// Position of this state in the state order.
    pub fn order(self) -> u8 {
        match self {
            JobState::New => 0,
            JobState::Queued => 1,
            JobState::Active => 2,
            JobState::Completed | JobState::Failed | JobState::Canceled => 3,
        }
    }

    /// Whether no further transitions can happen after this state.
    pub fn is_final(self) -> bool {
        self.order() == 3
    }

    /// Strict partial order on states.
    ///
    /// Returns `Some(true)` if this state can come after `other`,
    /// `Some(false)` if it cannot, and `None` if the two states are not
    /// comparable (distinct final states).
    pub fn is_greater_than(self, other: JobState) -> Option<bool> {
        if self.order() == other.order() {
            if self == other { Some(false) } else { None }
        } else {
            Some(self.order() > other.order())
        }
    }

    /// The state that must immediately precede this one, if any.
    pub fn predecessor(self) -> Option<JobState> {
        match self {
            JobState::New | JobState::Failed | JobState::Canceled => None,
            JobState::Queued => Some(JobState::New),
            JobState::Active => Some(JobState::Queued),
            JobState::Completed => Some(JobState::Active),
        }
    }

    /// Upper-case name of this state.
    pub fn name(self) -> &'static str {
        match self {
            JobState::New => "NEW",
            JobState::Queued => "QUEUED",
            JobState::Active => "ACTIVE",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Canceled => "CANCELED",
        }
    }

    /// Look a state up by its upper-case name.
    pub fn from_name(name: &str) -> Option<JobState> {
        JobState::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
