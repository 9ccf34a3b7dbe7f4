//! Task lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a Task as it moves through a stage unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created, or reset for another attempt.
    #[default]
    Pending,
    /// A stage unit is currently working on the task.
    InProgress,
    /// Task completed successfully.
    Completed,
    /// Task failed; may still be retried while budget remains.
    Failed,
    /// Some records succeeded while others failed or were skipped.
    PartialFailure,
    /// Task was cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if the task must not be mutated any further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Returns true if the status carries an error message.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::PartialFailure)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartialFailure => "partial_failure",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::PartialFailure.is_terminal());
    }

    #[test]
    fn test_serialized_form() {
        let json = serde_json::to_string(&TaskStatus::PartialFailure).unwrap();
        assert_eq!(json, "\"partial_failure\"");
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
    }
}
