use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::state::{AppState, UploadRecord};

#[derive(Debug, Deserialize)]
pub struct QuestionBody {
    question: String,
}

#[derive(Debug, Deserialize)]
pub struct QuestionsBody {
    questions: Vec<String>,
}

pub async fn ask_question(
    State(state): State<Arc<AppState>>,
    Path(pdf_id): Path<String>,
    Json(body): Json<QuestionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let start = Instant::now();
    let record = resolve_handle(&state, &pdf_id).await?;
    if body.question.trim().is_empty() {
        return Err(ApiError::unprocessable("question must not be empty"));
    }

    let result = state
        .tool_server
        .call_tool(
            "answer_question_rag",
            json!({
                "pdf_path": record.path.to_string_lossy(),
                "question": body.question,
                "top_k": state.settings.top_k,
            }),
        )
        .await?;

    Ok(Json(json!({
        "pdf_id": pdf_id,
        "answers": [answer_entry(&body.question, &result)],
        "processing_time": start.elapsed().as_secs_f64(),
    })))
}

pub async fn ask_multiple_questions(
    State(state): State<Arc<AppState>>,
    Path(pdf_id): Path<String>,
    Json(body): Json<QuestionsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let start = Instant::now();
    let record = resolve_handle(&state, &pdf_id).await?;
    if body.questions.is_empty() {
        return Err(ApiError::unprocessable("questions must not be empty"));
    }
    if body.questions.iter().any(|q| q.trim().is_empty()) {
        return Err(ApiError::unprocessable("questions must not contain blank entries"));
    }

    let result = state
        .tool_server
        .call_tool(
            "answer_multiple_questions_rag",
            json!({
                "pdf_path": record.path.to_string_lossy(),
                "questions": body.questions,
                "top_k": state.settings.top_k,
            }),
        )
        .await?;

    // Entries pass through as answer-or-error: one failing question never
    // fails the batch.
    let answers: Vec<Value> = result["results"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    Ok(Json(json!({
        "pdf_id": pdf_id,
        "answers": answers,
        "processing_time": start.elapsed().as_secs_f64(),
    })))
}

async fn resolve_handle(state: &AppState, pdf_id: &str) -> Result<UploadRecord, ApiError> {
    state.lookup_upload(pdf_id).await.ok_or_else(|| {
        ApiError::not_found(format!("PDF not found: {pdf_id}; upload it first"))
    })
}

fn answer_entry(question: &str, result: &Value) -> Value {
    json!({
        "question": question,
        "answer": result["answer"],
        "model": result["model"],
        "usage": result.get("usage").cloned().unwrap_or(Value::Null),
    })
}
