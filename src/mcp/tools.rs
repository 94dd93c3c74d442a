//! The closed tool set.
//!
//! Tools are a fixed enum with a dispatch table; each input schema is
//! static data and argument extraction is validated at the boundary, with
//! the offending field named in the error.

use serde_json::{json, Value};

/// Every tool the server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolId {
    ExtractPdfText,
    ExtractPdfMetadata,
    SearchPdf,
    IndexDocument,
    DeleteDocument,
    AnswerQuestion,
    AnswerQuestionRag,
    AnswerMultipleQuestionsRag,
    SummarizeDocument,
    ExtractKeyPoints,
}

impl ToolId {
    pub const ALL: [ToolId; 10] = [
        ToolId::ExtractPdfText,
        ToolId::ExtractPdfMetadata,
        ToolId::SearchPdf,
        ToolId::IndexDocument,
        ToolId::DeleteDocument,
        ToolId::AnswerQuestion,
        ToolId::AnswerQuestionRag,
        ToolId::AnswerMultipleQuestionsRag,
        ToolId::SummarizeDocument,
        ToolId::ExtractKeyPoints,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolId::ExtractPdfText => "extract_pdf_text",
            ToolId::ExtractPdfMetadata => "extract_pdf_metadata",
            ToolId::SearchPdf => "search_pdf",
            ToolId::IndexDocument => "index_document",
            ToolId::DeleteDocument => "delete_document",
            ToolId::AnswerQuestion => "answer_question",
            ToolId::AnswerQuestionRag => "answer_question_rag",
            ToolId::AnswerMultipleQuestionsRag => "answer_multiple_questions_rag",
            ToolId::SummarizeDocument => "summarize_document",
            ToolId::ExtractKeyPoints => "extract_key_points",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tool| tool.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolId::ExtractPdfText => "Extract all text content from a PDF file",
            ToolId::ExtractPdfMetadata => {
                "Extract metadata from a PDF file (title, author, pages, size)"
            }
            ToolId::SearchPdf => "Search for text within a PDF file",
            ToolId::IndexDocument => {
                "Build (or load) the retrieval index for a PDF and report chunk statistics"
            }
            ToolId::DeleteDocument => {
                "Drop a PDF's retrieval index and cached files; refused while a build is in flight"
            }
            ToolId::AnswerQuestion => {
                "Answer a question from the full document text (small PDFs only)"
            }
            ToolId::AnswerQuestionRag => {
                "Answer a question using retrieval over the most relevant sections"
            }
            ToolId::AnswerMultipleQuestionsRag => {
                "Answer several questions, retrieving relevant sections per question"
            }
            ToolId::SummarizeDocument => "Generate a summary of a document",
            ToolId::ExtractKeyPoints => "Extract the most important key points from a document",
        }
    }

    pub fn input_schema(&self) -> Value {
        let pdf_path = json!({ "type": "string", "description": "Path to the PDF file" });
        match self {
            ToolId::ExtractPdfText
            | ToolId::ExtractPdfMetadata
            | ToolId::IndexDocument
            | ToolId::DeleteDocument => json!({
                "type": "object",
                "properties": { "pdf_path": pdf_path },
                "required": ["pdf_path"],
            }),
            ToolId::SearchPdf => json!({
                "type": "object",
                "properties": {
                    "pdf_path": pdf_path,
                    "needle": { "type": "string", "description": "Text to search for" },
                    "case_sensitive": { "type": "boolean", "default": false },
                },
                "required": ["pdf_path", "needle"],
            }),
            ToolId::AnswerQuestion => json!({
                "type": "object",
                "properties": {
                    "pdf_path": pdf_path,
                    "question": { "type": "string", "description": "The question to answer" },
                },
                "required": ["pdf_path", "question"],
            }),
            ToolId::AnswerQuestionRag => json!({
                "type": "object",
                "properties": {
                    "pdf_path": pdf_path,
                    "question": { "type": "string", "description": "The question to answer" },
                    "top_k": { "type": "integer", "description": "Number of chunks to retrieve" },
                },
                "required": ["pdf_path", "question"],
            }),
            ToolId::AnswerMultipleQuestionsRag => json!({
                "type": "object",
                "properties": {
                    "pdf_path": pdf_path,
                    "questions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Questions to answer",
                    },
                    "top_k": { "type": "integer", "description": "Chunks to retrieve per question" },
                },
                "required": ["pdf_path", "questions"],
            }),
            ToolId::SummarizeDocument => json!({
                "type": "object",
                "properties": {
                    "pdf_path": pdf_path,
                    "max_length": { "type": "integer", "description": "Summary length in words" },
                },
                "required": ["pdf_path"],
            }),
            ToolId::ExtractKeyPoints => json!({
                "type": "object",
                "properties": {
                    "pdf_path": pdf_path,
                    "num_points": { "type": "integer", "default": 5 },
                },
                "required": ["pdf_path"],
            }),
        }
    }
}

/// The `tools/list` payload.
pub fn catalogue() -> Value {
    json!({
        "tools": ToolId::ALL
            .iter()
            .map(|tool| json!({
                "name": tool.name(),
                "description": tool.description(),
                "inputSchema": tool.input_schema(),
            }))
            .collect::<Vec<_>>()
    })
}

/// A missing or mistyped argument; names the offending field.
#[derive(Debug, Clone)]
pub struct ArgError {
    pub field: String,
    pub problem: String,
}

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

fn missing(field: &str) -> ArgError {
    ArgError {
        field: field.to_string(),
        problem: "required field is missing".to_string(),
    }
}

fn wrong_type(field: &str, expected: &str) -> ArgError {
    ArgError {
        field: field.to_string(),
        problem: format!("expected {expected}"),
    }
}

pub fn get_str(args: &Value, field: &str) -> Result<String, ArgError> {
    match args.get(field) {
        None | Some(Value::Null) => Err(missing(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(wrong_type(field, "a string")),
    }
}

pub fn opt_bool(args: &Value, field: &str) -> Result<bool, ArgError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(wrong_type(field, "a boolean")),
    }
}

pub fn opt_usize(args: &Value, field: &str) -> Result<Option<usize>, ArgError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| Some(v as usize))
            .ok_or_else(|| wrong_type(field, "a non-negative integer")),
        Some(_) => Err(wrong_type(field, "a non-negative integer")),
    }
}

pub fn get_str_array(args: &Value, field: &str) -> Result<Vec<String>, ArgError> {
    match args.get(field) {
        None | Some(Value::Null) => Err(missing(field)),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| wrong_type(field, "an array of strings"))
            })
            .collect(),
        Some(_) => Err(wrong_type(field, "an array of strings")),
    }
}
