//! Task type and lifecycle transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CoreError, Statistics, TaskId, TaskStatus};

/// Message stored when a failure is reported without one.
const UNKNOWN_ERROR: &str = "unknown error";

/// Kind of work a task describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Input validation ahead of generation.
    Validation,
    /// Grouped claim spreadsheets.
    GroupDocuments,
    /// Notice documents rendered from a template.
    NoticeDocuments,
    /// Consolidation of the generated trees.
    MergedOutput,
}

/// A Task is the unit handed to a stage unit.
///
/// A task is owned by exactly one executor at a time: stage units take it by
/// value and hand it back, so ownership moves on every `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    /// Unique task identifier.
    #[serde(rename = "task_id")]
    pub id: TaskId,

    /// What the task produces.
    pub task_type: TaskType,

    /// Opaque input payload.
    #[serde(skip_serializing)]
    pub input: Map<String, Value>,

    /// Outputs accumulated by stages (`stats`, `validation_result`, ...).
    pub metadata: Map<String, Value>,

    status: TaskStatus,
    retry_count: u32,
    max_retries: u32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending Task.
    pub fn new(id: TaskId, task_type: TaskType, input: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            task_type,
            input,
            metadata: Map::new(),
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder method to set the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retry_count = self.retry_count.min(max_retries);
        self
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Read a string field from the input payload.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Statistics a stage stored under `metadata["stats"]`, if any.
    pub fn stats(&self) -> Option<Statistics> {
        self.metadata.get("stats").map(Statistics::from_metadata)
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if another attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Mark the task as in progress.
    pub fn mark_in_progress(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::InProgress)
    }

    /// Mark the task as completed, recording statistics when given.
    pub fn mark_completed(&mut self, stats: Option<&Statistics>) -> Result<(), CoreError> {
        self.transition(TaskStatus::Completed)?;
        if let Some(stats) = stats {
            self.metadata.insert("stats".into(), stats.to_metadata());
        }
        Ok(())
    }

    /// Mark the task as failed.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(TaskStatus::Failed)?;
        self.error_message = Some(non_empty(error.into()));
        Ok(())
    }

    /// Mark the task as partially failed, keeping the partial statistics.
    pub fn mark_partial_failure(
        &mut self,
        error: impl Into<String>,
        stats: Option<&Statistics>,
    ) -> Result<(), CoreError> {
        self.transition(TaskStatus::PartialFailure)?;
        self.error_message = Some(non_empty(error.into()));
        if let Some(stats) = stats {
            self.metadata.insert("stats".into(), stats.to_metadata());
        }
        Ok(())
    }

    /// Mark the task as cancelled.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Cancelled)
    }

    /// Consume one unit of retry budget and reset the task to `Pending`.
    pub fn increment_retry(&mut self) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(CoreError::InvalidStateTransition {
                from: self.status,
                to: TaskStatus::Pending,
            });
        }
        if !self.can_retry() {
            return Err(CoreError::RetriesExhausted {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.error_message = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(CoreError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if !to.is_failure() {
            self.error_message = None;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        UNKNOWN_ERROR.to_string()
    } else {
        message
    }
}
