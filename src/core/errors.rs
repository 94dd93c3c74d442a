use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Failure classification shared by the tool server and the HTTP proxy.
///
/// The tool server carries the kind in JSON-RPC error data; the proxy maps
/// it to an HTTP status and echoes it in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadInput,
    UnknownHandle,
    ExtractFailed,
    LowYield,
    EmbedFailed,
    IndexUnavailable,
    ModelTransient,
    ModelPermanent,
    ModelTimeout,
    BackendUnavailable,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadInput => "bad_input",
            ErrorKind::UnknownHandle => "unknown_handle",
            ErrorKind::ExtractFailed => "extract_failed",
            ErrorKind::LowYield => "low_yield",
            ErrorKind::EmbedFailed => "embed_failed",
            ErrorKind::IndexUnavailable => "index_unavailable",
            ErrorKind::ModelTransient => "model_transient",
            ErrorKind::ModelPermanent => "model_permanent",
            ErrorKind::ModelTimeout => "model_timeout",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::BadInput => StatusCode::BAD_REQUEST,
            ErrorKind::UnknownHandle => StatusCode::NOT_FOUND,
            ErrorKind::ExtractFailed => StatusCode::BAD_REQUEST,
            ErrorKind::LowYield => StatusCode::BAD_REQUEST,
            ErrorKind::EmbedFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::IndexUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ModelTransient => StatusCode::BAD_GATEWAY,
            ErrorKind::ModelPermanent => StatusCode::BAD_GATEWAY,
            ErrorKind::ModelTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed tool operation. Serialized verbatim into the JSON-RPC error
/// `data` field as `{ "kind": ..., "detail": ... }`.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn bad_input(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadInput, detail)
    }

    pub fn extract_failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExtractFailed, detail)
    }

    pub fn low_yield(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::LowYield, detail)
    }

    pub fn embed_failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmbedFailed, detail)
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(ErrorKind::Internal, err.to_string())
    }
}

/// HTTP-facing error. The status usually follows the kind, but a handler
/// may override it (422 for an empty question, 413 for an oversized upload).
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: kind.status(),
            kind,
            message: message.into(),
        }
    }

    pub fn with_status(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownHandle, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::with_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::BadInput,
            message,
        )
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::PAYLOAD_TOO_LARGE, ErrorKind::BadInput, message)
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(ErrorKind::Internal, err.to_string())
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        ApiError::new(err.kind, err.detail)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(json!({
            "kind": self.kind,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}
