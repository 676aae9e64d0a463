//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};

use crate::json::HealthResponse;
use crate::AppState;

/// Health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/healthcheck", get(health_check))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let projects = state.store.list_projects().await;
    let store_ok = projects.is_ok();

    Json(HealthResponse {
        status: if store_ok { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        projects: projects.map(|p| p.len()).unwrap_or(0),
        active_sessions: state.sessions.count(),
    })
}
