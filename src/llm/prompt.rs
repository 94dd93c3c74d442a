//! Prompt assembly for document analysis.
//!
//! The analysis prompt hard-constrains the model to the supplied excerpts;
//! the formatting prompt reshapes a raw answer into readable markdown.

use crate::rag::index::ScoredChunk;

pub const ANALYSIS_SYSTEM_PROMPT: &str = "\
You are a document analysis assistant. Your ONLY job is to extract information from the provided document.
CRITICAL RULES:
1. Answer ONLY using information explicitly stated in the document
2. Do NOT use any external knowledge or information from the web
3. If the answer is not in the document, respond with 'This information is not found in the document'
4. Provide direct quotes from the document when possible
5. Do not make inferences beyond what is explicitly stated";

pub const FORMAT_SYSTEM_PROMPT: &str = "\
You are an expert at summarizing and formatting answers.
Your job is to make answers clear, concise, and user-friendly.
CRITICAL RULES:
1. Keep all factual information from the original answer
2. Make the answer more readable and well-structured
3. Use bullet points, numbering, or paragraphs as appropriate
4. Remove redundancy but preserve all key details
5. If the answer says information is not found, keep that clear";

/// Joins retrieved chunks into one context block with numbered separators.
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(idx, scored)| format!("[Relevant Section {}]\n{}", idx + 1, scored.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn analysis_user_message(document_text: &str, question: &str) -> String {
    format!(
        "DOCUMENT CONTENT:\n---\n{document_text}\n---\n\n\
         QUESTION: {question}\n\n\
         Extract the answer from the document above. Only use information from the document."
    )
}

pub fn format_user_message(question: &str, raw_answer: &str) -> String {
    format!(
        "Original Question: {question}\n\n\
         Raw Answer to Summarize:\n---\n{raw_answer}\n---\n\n\
         Please provide a clear, well-formatted version of this answer. \
         Make it easy to read while preserving all important information."
    )
}

pub fn summary_question(max_length: Option<usize>) -> String {
    match max_length {
        Some(words) => format!(
            "Please provide a comprehensive summary of this document in approximately {words} words."
        ),
        None => "Please provide a comprehensive summary of this document.".to_string(),
    }
}

pub fn key_points_question(num_points: usize) -> String {
    format!(
        "Please extract the {num_points} most important key points from this document. \
         Format each point as a bullet point."
    )
}

/// Pulls bullet points out of a model answer, falling back to the whole
/// answer as a single point when no list markers are found.
pub fn parse_key_points(answer: &str, num_points: usize) -> Vec<String> {
    let points: Vec<String> = answer
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && (line.starts_with(['•', '-', '*'])
                    || line.chars().next().is_some_and(|c| c.is_ascii_digit()))
        })
        .map(|line| {
            line.trim_start_matches(['•', '-', '*'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect();

    if points.is_empty() {
        vec![answer.trim().to_string()]
    } else {
        points.into_iter().take(num_points).collect()
    }
}
