//! opnflow Pipeline Library
//!
//! Runs the fixed document pipeline:
//!
//! ```text
//! validate -> { generate groups, generate notices } -> merge
//! ```
//!
//! Stage units share one contract ([`StageUnit`]); the [`RetryingExecutor`]
//! adds bounded exponential backoff around any of them, and the
//! [`PipelineController`] composes them and aggregates their statistics.

pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod http;
pub mod stages;

pub use config::{derive_output_paths, BackoffPolicy, OutputPaths, PipelineConfig, ServerConfig};
pub use controller::PipelineController;
pub use error::PipelineError;
pub use executor::{RetryingExecutor, StageOutcome, StageUnit};
pub use stages::{CommandStage, MergeStage, ValidationStage, WorkbookInspector, WorkbookSummary};
