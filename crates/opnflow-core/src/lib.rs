//! opnflow Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Filesystem
//! - Runtime specifics
//!
//! Task lifecycle, mergeable statistics and the pipeline outcome live here
//! so both the pipeline service and the request router share one vocabulary.

pub mod error;
pub mod ids;
pub mod outcome;
pub mod stats;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{SessionId, TaskId};
pub use outcome::{PipelineOutcome, PipelineStatus, ValidationReport};
pub use stats::Statistics;
pub use status::TaskStatus;
pub use task::{Task, TaskType};
