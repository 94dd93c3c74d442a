use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{ask, health, pdfs, upload};
use crate::state::AppState;

/// Builds the HTTP surface: upload, question answering, handle listing
/// and deletion, plus a health endpoint at the root.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);
    let body_limit = DefaultBodyLimit::max(state.settings.max_upload_bytes);

    Router::new()
        .route("/", get(health::health))
        .route("/upload", post(upload::upload_pdf))
        .route("/ask/:pdf_id", post(ask::ask_question))
        .route("/ask-multiple/:pdf_id", post(ask::ask_multiple_questions))
        .route("/pdfs", get(pdfs::list_pdfs))
        .route("/pdf/:pdf_id", delete(pdfs::delete_pdf))
        .with_state(state)
        .layer(body_limit)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let mut origins = default_local_origins();
    origins.extend(state.settings.allowed_origins.iter().cloned());

    let allow_origin = AllowOrigin::list(
        origins
            .into_iter()
            .filter_map(|origin| HeaderValue::from_str(&origin).ok())
            .collect::<Vec<_>>(),
    );

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
