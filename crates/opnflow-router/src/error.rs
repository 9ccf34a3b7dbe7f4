//! Router errors, tagged by the routing step that produced them.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Step of request handling an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStep {
    Classification,
    Registration,
    FileResolution,
    PayloadConstruction,
    Dispatch,
}

impl fmt::Display for RouteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Classification => "classification",
            Self::Registration => "registration",
            Self::FileResolution => "file_resolution",
            Self::PayloadConstruction => "payload_construction",
            Self::Dispatch => "dispatch",
        };
        f.write_str(s)
    }
}

/// Errors raised while routing a request.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The classifier could not be reached or gave an unusable answer.
    #[error("{0}")]
    Classification(String),

    /// No usable agent registration.
    #[error("{0}")]
    Registration(String),

    /// A required file or parameter could not be resolved.
    #[error("{0}")]
    FileResolution(String),

    /// A payload template referenced something we do not have.
    #[error("Cannot build payload field '{key}': {reason}")]
    PayloadConstruction { key: String, reason: String },

    /// The remote call failed.
    #[error("{0}")]
    Dispatch(String),

    /// The agent registry file could not be loaded.
    #[error("Failed to load agent registry: {0}")]
    Registry(String),
}

impl RouterError {
    /// Step the error belongs to.
    pub fn step(&self) -> RouteStep {
        match self {
            Self::Classification(_) => RouteStep::Classification,
            Self::Registration(_) | Self::Registry(_) => RouteStep::Registration,
            Self::FileResolution(_) => RouteStep::FileResolution,
            Self::PayloadConstruction { .. } => RouteStep::PayloadConstruction,
            Self::Dispatch(_) => RouteStep::Dispatch,
        }
    }

    /// Form used in response envelopes: `"[step] message"`.
    pub fn tagged(&self) -> String {
        format!("[{}] {}", self.step(), self)
    }
}
