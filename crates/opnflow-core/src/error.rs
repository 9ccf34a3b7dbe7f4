//! Core domain errors.

use thiserror::Error;

use crate::TaskStatus;

/// Core domain errors for opnflow.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Attempted to mutate a task that already reached a terminal state,
    /// or to make a transition the lifecycle forbids.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    /// Retry requested with no budget left.
    #[error("Retry budget exhausted ({retry_count}/{max_retries})")]
    RetriesExhausted { retry_count: u32, max_retries: u32 },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
