//! Response types for the HTTP API.

use serde::Serialize;

/// Registered agent, as listed by `/agents`.
#[derive(Debug, Serialize)]
pub struct AgentResponse {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagent: Option<String>,
    pub description: String,
    pub endpoint: Option<String>,
    pub file_resolution: bool,
}

/// Body of `/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agents: usize,
    pub sessions: usize,
}
