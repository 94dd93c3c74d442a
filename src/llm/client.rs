//! Client for the remote completion endpoint.
//!
//! Speaks the OpenAI-compatible chat completions shape: POST with a JSON
//! body, Bearer auth from the environment, `choices[0].message.content` in
//! the response. Transient upstream failures (429, 5xx, connection errors)
//! are retried with exponential backoff; other 4xx fail fast; hitting the
//! per-call wall clock yields `model_timeout`.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::core::config::Settings;
use crate::core::errors::{ErrorKind, ToolError};
use crate::llm::prompt;
use crate::llm::types::{ChatMessage, Completion, TokenUsage};

pub struct CompletionClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model_id: String,
    temperature: f64,
    max_tokens: u32,
    max_retries: u32,
    format_answers: bool,
}

impl CompletionClient {
    pub fn new(settings: &Settings) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(settings.model_timeout)
            .build()
            .map_err(ToolError::internal)?;

        Ok(Self {
            http,
            api_url: settings.model_api_url.clone(),
            api_key: settings.model_api_key.clone(),
            model_id: settings.model_id.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            max_retries: settings.model_max_retries,
            format_answers: settings.format_answers,
        })
    }

    /// Answers `question` from `document_text` only, optionally reshaping
    /// the raw answer with a second formatting call. The formatting pass is
    /// best-effort: any failure returns the raw answer.
    pub async fn analyze(
        &self,
        document_text: &str,
        question: &str,
    ) -> Result<Completion, ToolError> {
        let raw = self
            .chat(
                prompt::ANALYSIS_SYSTEM_PROMPT,
                &prompt::analysis_user_message(document_text, question),
            )
            .await?;

        if !self.format_answers {
            return Ok(raw);
        }

        match self
            .chat(
                prompt::FORMAT_SYSTEM_PROMPT,
                &prompt::format_user_message(question, &raw.answer),
            )
            .await
        {
            Ok(formatted) => Ok(Completion {
                answer: formatted.answer,
                model: raw.model,
                usage: raw.usage,
            }),
            Err(err) => {
                tracing::warn!("answer formatting pass failed, returning raw answer: {err}");
                Ok(raw)
            }
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<Completion, ToolError> {
        if self.api_key.trim().is_empty() {
            return Err(ToolError::bad_input(
                "MODEL_API_KEY is not set; cannot call the completion endpoint",
            ));
        }

        let body = json!({
            "model": self.model_id,
            "messages": [
                ChatMessage::system(system),
                ChatMessage::user(user),
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut last_err: Option<ToolError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let response = self
                .http
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let payload: Value =
                            response.json().await.map_err(|err| {
                                ToolError::new(
                                    ErrorKind::ModelPermanent,
                                    format!("invalid completion response: {err}"),
                                )
                            })?;
                        return parse_completion(&payload, &self.model_id);
                    }

                    let detail = response.text().await.unwrap_or_default();
                    if is_transient_status(status) {
                        tracing::warn!(%status, attempt, "transient completion error, will retry");
                        last_err = Some(ToolError::new(
                            ErrorKind::ModelTransient,
                            format!("completion endpoint returned {status}: {detail}"),
                        ));
                        continue;
                    }
                    return Err(ToolError::new(
                        ErrorKind::ModelPermanent,
                        format!("completion endpoint returned {status}: {detail}"),
                    ));
                }
                Err(err) if err.is_timeout() => {
                    return Err(ToolError::new(
                        ErrorKind::ModelTimeout,
                        format!("completion call exceeded its deadline: {err}"),
                    ));
                }
                Err(err) => {
                    tracing::warn!(attempt, "completion transport error, will retry: {err}");
                    last_err = Some(ToolError::new(
                        ErrorKind::ModelTransient,
                        format!("completion transport error: {err}"),
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ToolError::new(ErrorKind::ModelTransient, "completion retries exhausted")
        }))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

fn parse_completion(payload: &Value, fallback_model: &str) -> Result<Completion, ToolError> {
    let answer = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ToolError::new(
                ErrorKind::ModelPermanent,
                "completion response missing choices[0].message.content",
            )
        })?
        .to_string();

    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(fallback_model)
        .to_string();

    let usage = payload
        .get("usage")
        .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());

    Ok(Completion {
        answer,
        model,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_answer_model_and_usage() {
        let payload = json!({
            "model": "sonar",
            "choices": [ { "message": { "role": "assistant", "content": "Fredonia City" } } ],
            "usage": { "prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14 }
        });
        let completion = parse_completion(&payload, "fallback").unwrap();
        assert_eq!(completion.answer, "Fredonia City");
        assert_eq!(completion.model, "sonar");
        assert_eq!(completion.usage.unwrap().total_tokens, 14);
    }

    #[test]
    fn missing_content_is_a_permanent_error() {
        let payload = json!({ "choices": [] });
        let err = parse_completion(&payload, "m").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelPermanent);
    }

    #[test]
    fn model_falls_back_when_absent() {
        let payload = json!({
            "choices": [ { "message": { "content": "hi" } } ]
        });
        let completion = parse_completion(&payload, "fallback").unwrap();
        assert_eq!(completion.model, "fallback");
        assert!(completion.usage.is_none());
    }

    #[test]
    fn transient_status_classification() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(40), Duration::from_secs(32));
    }
}
