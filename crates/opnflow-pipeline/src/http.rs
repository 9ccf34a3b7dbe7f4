//! HTTP surface for the pipeline.
//!
//! - `POST /run-workflow`: run one pipeline, body is a [`PipelineConfig`]
//! - `GET /health`: liveness

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::PipelineConfig;
use crate::controller::PipelineController;

/// Shared state for the HTTP handlers.
pub struct AppState {
    pub controller: PipelineController,
}

impl AppState {
    pub fn new(controller: PipelineController) -> Self {
        Self { controller }
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/run-workflow", post(run_workflow))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run the pipeline and return its outcome.
///
/// Pipeline failures are reported in the body with status 200; only an
/// unusable request body is rejected (by the `Json` extractor).
async fn run_workflow(
    State(state): State<Arc<AppState>>,
    Json(config): Json<PipelineConfig>,
) -> impl IntoResponse {
    let config = config.with_derived_outputs();
    info!(excel = ?config.excel_path, "Workflow requested");
    let outcome = state.controller.process(config).await;
    (StatusCode::OK, Json(outcome))
}
