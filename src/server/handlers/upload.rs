use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::core::errors::{ApiError, ErrorKind};
use crate::state::{new_pdf_id, AppState, UploadRecord};

/// Accepts a multipart PDF upload, persists it under a fresh handle, and
/// warms the retrieval index. An image-only PDF still uploads (the 400
/// surfaces when it is asked about); `num_chunks` is 0 in that case.
pub async fn upload_pdf(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let start = Instant::now();

    let mut file: Option<(String, axum::body::Bytes)> = None;
    while let Some(field) = multipart.next_field().await.map_err(map_multipart_err)? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.pdf").to_string();
            let bytes = field.bytes().await.map_err(map_multipart_err)?;
            file = Some((filename, bytes));
            break;
        }
    }

    let (filename, bytes) = file.ok_or_else(|| {
        ApiError::bad_request("multipart field 'file' is required")
    })?;
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(ApiError::bad_request("only PDF files are allowed"));
    }
    if bytes.len() > state.settings.max_upload_bytes {
        return Err(ApiError::payload_too_large(format!(
            "upload exceeds the {} byte limit",
            state.settings.max_upload_bytes
        )));
    }
    if bytes.is_empty() {
        return Err(ApiError::bad_request("uploaded file is empty"));
    }

    let uploaded_at = Utc::now();
    let pdf_id = new_pdf_id(&filename, uploaded_at);
    let final_path = state.paths.uploads_dir.join(format!("{pdf_id}.pdf"));
    let part_path = state.paths.uploads_dir.join(format!("{pdf_id}.pdf.part"));

    // Write-then-rename: the handle becomes visible only once the file is
    // fully persisted.
    tokio::fs::write(&part_path, &bytes)
        .await
        .map_err(ApiError::internal)?;
    tokio::fs::rename(&part_path, &final_path)
        .await
        .map_err(ApiError::internal)?;

    let pdf_path = final_path.to_string_lossy().to_string();

    let metadata = match state
        .tool_server
        .call_tool("extract_pdf_metadata", json!({ "pdf_path": pdf_path }))
        .await
    {
        Ok(metadata) => metadata,
        Err(err) => {
            let _ = tokio::fs::remove_file(&final_path).await;
            return Err(err.into());
        }
    };
    let num_pages = metadata["num_pages"].as_u64().unwrap_or(0);

    let (num_chunks, low_yield_hint) = match state
        .tool_server
        .call_tool("index_document", json!({ "pdf_path": pdf_path }))
        .await
    {
        Ok(result) => (result["num_chunks"].as_u64().unwrap_or(0), None),
        Err(err) if err.kind == ErrorKind::LowYield => {
            tracing::warn!(%pdf_id, "uploaded PDF is low-yield: {}", err.detail);
            (0, Some(err.detail))
        }
        Err(err) => {
            let _ = tokio::fs::remove_file(&final_path).await;
            return Err(err.into());
        }
    };

    state
        .register_upload(UploadRecord {
            pdf_id: pdf_id.clone(),
            filename: filename.clone(),
            path: final_path,
            uploaded_at,
        })
        .await;

    let elapsed = start.elapsed().as_secs_f64();
    let message = match low_yield_hint {
        Some(hint) => format!(
            "PDF uploaded, but no text could be indexed ({hint}); questions will be rejected"
        ),
        None => format!("PDF processed successfully in {elapsed:.2}s"),
    };

    Ok(Json(json!({
        "pdf_id": pdf_id,
        "filename": filename,
        "num_pages": num_pages,
        "num_chunks": num_chunks,
        "message": message,
    })))
}

fn map_multipart_err(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("upload exceeds the configured size limit")
    } else {
        ApiError::bad_request(format!("invalid multipart body: {err}"))
    }
}
