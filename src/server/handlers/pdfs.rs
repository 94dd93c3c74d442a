use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn list_pdfs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.list_uploads().await)
}

/// Deletes a handle and cascades to its index and upload file. Index
/// teardown goes through the tool server's `delete_document` tool so the
/// registry can refuse while a build for the document is in flight; the
/// upload file is only unlinked after the registry has let go of it.
pub async fn delete_pdf(
    State(state): State<Arc<AppState>>,
    Path(pdf_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .lookup_upload(&pdf_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("PDF not found: {pdf_id}")))?;

    state
        .tool_server
        .call_tool(
            "delete_document",
            json!({ "pdf_path": record.path.to_string_lossy() }),
        )
        .await?;

    if let Err(err) = tokio::fs::remove_file(&record.path).await {
        tracing::warn!(%pdf_id, "failed to remove upload file: {err}");
    }
    state.remove_upload(&pdf_id).await;

    Ok(Json(json!({ "deleted": pdf_id })))
}
