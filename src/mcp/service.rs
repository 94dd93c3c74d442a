//! Tool execution.
//!
//! Wires the closed tool set to the extractor, the document registry, and
//! the completion client. Argument problems and tool failures stay
//! distinct so the server can map them to the right JSON-RPC codes.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::config::{AppPaths, Settings};
use crate::core::errors::ToolError;
use crate::llm::prompt;
use crate::llm::CompletionClient;
use crate::pdf;
use crate::rag::embedding::{self, embed_with_retry};
use crate::rag::index::DocumentIndex;
use crate::rag::registry::DocumentRegistry;
use crate::mcp::tools::{self, ArgError, ToolId};

#[derive(Debug)]
pub enum ToolCallError {
    InvalidParams(String),
    Failed(ToolError),
}

impl From<ArgError> for ToolCallError {
    fn from(err: ArgError) -> Self {
        ToolCallError::InvalidParams(err.to_string())
    }
}

impl From<ToolError> for ToolCallError {
    fn from(err: ToolError) -> Self {
        ToolCallError::Failed(err)
    }
}

pub struct ToolService {
    settings: Settings,
    registry: DocumentRegistry,
    client: CompletionClient,
}

impl ToolService {
    pub fn new(settings: Settings, paths: &AppPaths) -> Result<Self, ToolError> {
        let embedder = embedding::create_embedder(&settings.embedding_model_id)?;
        let registry = DocumentRegistry::new(
            paths.cache_dir.clone(),
            embedder,
            settings.chunk_params(),
            settings.max_concurrent_builds,
        );
        let client = CompletionClient::new(&settings)?;
        Ok(Self {
            settings,
            registry,
            client,
        })
    }

    pub async fn handle(&self, tool: ToolId, args: &Value) -> Result<Value, ToolCallError> {
        match tool {
            ToolId::ExtractPdfText => self.extract_pdf_text(args).await,
            ToolId::ExtractPdfMetadata => self.extract_pdf_metadata(args).await,
            ToolId::SearchPdf => self.search_pdf(args).await,
            ToolId::IndexDocument => self.index_document(args).await,
            ToolId::DeleteDocument => self.delete_document(args).await,
            ToolId::AnswerQuestion => self.answer_question(args).await,
            ToolId::AnswerQuestionRag => self.answer_question_rag(args).await,
            ToolId::AnswerMultipleQuestionsRag => self.answer_multiple_questions_rag(args).await,
            ToolId::SummarizeDocument => self.summarize_document(args).await,
            ToolId::ExtractKeyPoints => self.extract_key_points(args).await,
        }
    }

    async fn extract_pdf_text(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let document = pdf::extract(&path).await?;
        Ok(json!({
            "text": document.text,
            "num_pages": document.num_pages(),
            "num_characters": document.num_characters(),
        }))
    }

    async fn extract_pdf_metadata(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let metadata = pdf::metadata(&path).await?;
        serde_json::to_value(metadata).map_err(|err| ToolError::internal(err).into())
    }

    async fn search_pdf(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let needle = tools::get_str(args, "needle")?;
        let case_sensitive = tools::opt_bool(args, "case_sensitive")?;

        let document = pdf::extract(&path).await?;
        let hits = pdf::search(&document, &needle, case_sensitive);
        serde_json::to_value(hits).map_err(|err| ToolError::internal(err).into())
    }

    async fn index_document(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let metadata = pdf::metadata(&path).await?;
        let built = self.registry.get_or_build(&path).await?;
        Ok(json!({
            "num_pages": metadata.num_pages,
            "num_chunks": built.index.num_chunks(),
            "num_characters": document_characters(&built.index),
            "cached": !built.freshly_built,
        }))
    }

    async fn delete_document(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let deleted = self.registry.remove(&path).await?;
        Ok(json!({ "deleted": deleted }))
    }

    async fn answer_question(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let question = non_empty_question(args)?;

        let document = pdf::extract(&path).await?;
        let num_characters = document.num_characters();
        if num_characters > self.settings.full_doc_ceiling {
            return Err(ToolError::bad_input(format!(
                "document has {num_characters} characters, above the {} limit for \
                 single-pass analysis; use answer_question_rag instead",
                self.settings.full_doc_ceiling
            ))
            .into());
        }

        let completion = self.client.analyze(&document.text, &question).await?;
        Ok(json!({
            "question": question,
            "answer": completion.answer,
            "model": completion.model,
            "usage": completion.usage,
        }))
    }

    async fn answer_question_rag(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let question = non_empty_question(args)?;
        let top_k = tools::opt_usize(args, "top_k")?.unwrap_or(self.settings.top_k);

        let built = self.registry.get_or_build(&path).await?;
        let answer = self.answer_one(&built.index, &question, top_k).await?;
        Ok(answer)
    }

    async fn answer_multiple_questions_rag(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let questions = tools::get_str_array(args, "questions")?;
        if questions.is_empty() {
            return Err(ArgError {
                field: "questions".to_string(),
                problem: "must contain at least one question".to_string(),
            }
            .into());
        }
        let top_k = tools::opt_usize(args, "top_k")?.unwrap_or(self.settings.top_k);

        let built = self.registry.get_or_build(&path).await?;

        // One question failing never fails the batch; its entry carries the
        // error instead of an answer.
        let mut results = Vec::with_capacity(questions.len());
        for question in &questions {
            match self.answer_one(&built.index, question, top_k).await {
                Ok(entry) => results.push(entry),
                Err(err) => {
                    tracing::warn!(%question, "question failed: {err}");
                    results.push(json!({
                        "question": question,
                        "error": err,
                    }));
                }
            }
        }

        Ok(json!({
            "results": results,
            "total_questions": questions.len(),
        }))
    }

    async fn answer_one(
        &self,
        index: &Arc<DocumentIndex>,
        question: &str,
        top_k: usize,
    ) -> Result<Value, ToolError> {
        let embedder = self.registry.embedder();
        let query = embed_with_retry(embedder.as_ref(), &[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::embed_failed("empty query embedding"))?;

        let retrieved = index.search(&query, top_k)?;
        if retrieved.is_empty() {
            return Err(ToolError::low_yield("document produced no chunks to search"));
        }

        let context = prompt::build_context(&retrieved);
        let completion = self.client.analyze(&context, question).await?;
        Ok(json!({
            "question": question,
            "answer": completion.answer,
            "model": completion.model,
            "usage": completion.usage,
            "chunks_retrieved": retrieved.len(),
            "context_length": context.chars().count(),
        }))
    }

    async fn summarize_document(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let max_length = tools::opt_usize(args, "max_length")?;

        let text = self.bounded_text(&path).await?;
        let completion = self
            .client
            .analyze(&text, &prompt::summary_question(max_length))
            .await?;
        Ok(json!({
            "summary": completion.answer,
            "model": completion.model,
            "usage": completion.usage,
        }))
    }

    async fn extract_key_points(&self, args: &Value) -> Result<Value, ToolCallError> {
        let path = pdf_path(args)?;
        let num_points = tools::opt_usize(args, "num_points")?.unwrap_or(5).max(1);

        let text = self.bounded_text(&path).await?;
        let completion = self
            .client
            .analyze(&text, &prompt::key_points_question(num_points))
            .await?;
        Ok(json!({
            "key_points": prompt::parse_key_points(&completion.answer, num_points),
            "model": completion.model,
        }))
    }

    /// Full document text, truncated at the single-pass ceiling so the
    /// prompt stays bounded on large PDFs.
    async fn bounded_text(&self, path: &PathBuf) -> Result<String, ToolError> {
        let document = pdf::extract(path).await?;
        if document.is_low_yield() {
            return Err(ToolError::low_yield(format!(
                "extracted only {} characters across {} pages; the PDF looks image-only",
                document.num_characters(),
                document.num_pages()
            )));
        }
        let ceiling = self.settings.full_doc_ceiling;
        if document.num_characters() > ceiling {
            Ok(document.text.chars().take(ceiling).collect())
        } else {
            Ok(document.text)
        }
    }
}

fn pdf_path(args: &Value) -> Result<PathBuf, ArgError> {
    tools::get_str(args, "pdf_path").map(PathBuf::from)
}

fn non_empty_question(args: &Value) -> Result<String, ToolCallError> {
    let question = tools::get_str(args, "question")?;
    if question.trim().is_empty() {
        return Err(ArgError {
            field: "question".to_string(),
            problem: "must not be empty".to_string(),
        }
        .into());
    }
    Ok(question)
}

/// Total characters of the source text, recovered from the last chunk.
fn document_characters(index: &DocumentIndex) -> usize {
    index
        .chunks
        .last()
        .map(|chunk| chunk.char_offset + chunk.text.chars().count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn question_must_not_be_blank() {
        let result = non_empty_question(&json!({ "question": "   " }));
        assert!(matches!(result, Err(ToolCallError::InvalidParams(msg)) if msg.contains("question")));
    }

    #[test]
    fn pdf_path_is_required() {
        let err = pdf_path(&json!({})).unwrap_err();
        assert_eq!(err.field, "pdf_path");
    }
}
