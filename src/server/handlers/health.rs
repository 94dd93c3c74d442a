use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "PDF Q&A Proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "backend_available": !state.tool_server.is_failed_permanently(),
    }))
}
