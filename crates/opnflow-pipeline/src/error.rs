//! Pipeline errors.

use thiserror::Error;

/// Errors raised while preparing or running pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required configuration key is absent.
    #[error("Missing required configuration keys: {0:?}")]
    MissingConfig(Vec<&'static str>),

    /// Configuration present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Renderer command could not be started.
    #[error("Failed to spawn renderer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Renderer produced output we could not read.
    #[error("Invalid renderer output: {0}")]
    InvalidOutput(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Task lifecycle violation.
    #[error(transparent)]
    Core(#[from] opnflow_core::CoreError),
}
