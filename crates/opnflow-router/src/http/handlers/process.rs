//! Query processing handler.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use tracing::info;

use crate::router::RouteRequest;
use crate::state::AppState;

/// Route one query and return its envelope.
///
/// Routing failures are part of the envelope, so this always answers 200
/// for a well-formed body.
pub async fn process_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RouteRequest>,
) -> impl IntoResponse {
    info!(session = ?request.session_id, "Processing query");
    let envelope = state.router.handle(request).await;
    info!(status = ?envelope.status, "Query processed");
    Json(envelope)
}
