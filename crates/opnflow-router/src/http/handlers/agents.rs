//! Agent listing handler.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use crate::http::responses::AgentResponse;
use crate::state::AppState;

/// List registered agents as JSON.
pub async fn list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response: Vec<AgentResponse> = state
        .router
        .registry()
        .agents()
        .iter()
        .map(|a| AgentResponse {
            name: a.name.clone(),
            subagent: a.subagent.clone(),
            description: a.description.clone(),
            endpoint: a.endpoint.clone(),
            file_resolution: a.file_resolution.enabled,
        })
        .collect();
    Json(response)
}
