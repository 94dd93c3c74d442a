//! PDF text extraction and metadata.
//!
//! Parsing is delegated to `pdf-extract` (page text) and `lopdf`
//! (document info dictionary, page count, encryption check). Extraction is
//! CPU-bound and always runs under `spawn_blocking`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::ToolError;

/// Average characters per page below which a document is treated as
/// image-only and refused before indexing.
pub const LOW_YIELD_CHARS_PER_PAGE: usize = 100;

/// Number of context characters on each side of a search hit.
const SNIPPET_CONTEXT: usize = 100;

/// Extracted text of one document, page by page.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub pages: Vec<String>,
    pub text: String,
}

impl ExtractedDocument {
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn num_characters(&self) -> usize {
        self.text.chars().count()
    }

    /// True when average text density falls below the scanned-PDF threshold.
    pub fn is_low_yield(&self) -> bool {
        let pages = self.num_pages().max(1);
        self.num_characters() < LOW_YIELD_CHARS_PER_PAGE * pages
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub num_pages: usize,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// 1-indexed page number.
    pub page: usize,
    /// Character offset of the match within the page text.
    pub offset: usize,
    pub snippet: String,
}

/// Extracts per-page text from a PDF on disk.
pub async fn extract(path: &Path) -> Result<ExtractedDocument, ToolError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&path))
        .await
        .map_err(ToolError::internal)?
}

/// Reads document metadata without extracting page text.
pub async fn metadata(path: &Path) -> Result<PdfMetadata, ToolError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || metadata_blocking(&path))
        .await
        .map_err(ToolError::internal)?
}

fn check_exists(path: &Path) -> Result<(), ToolError> {
    if !path.is_file() {
        return Err(ToolError::bad_input(format!(
            "PDF file not found: {}",
            path.display()
        )));
    }
    Ok(())
}

fn extract_blocking(path: &PathBuf) -> Result<ExtractedDocument, ToolError> {
    check_exists(path)?;
    reject_encrypted(path)?;

    let pages = pdf_extract::extract_text_by_pages(path).map_err(|err| {
        ToolError::extract_failed(format!("failed to extract text: {err}"))
    })?;

    let text = pages
        .iter()
        .map(|p| p.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(ExtractedDocument { pages, text })
}

fn metadata_blocking(path: &PathBuf) -> Result<PdfMetadata, ToolError> {
    check_exists(path)?;

    let file_size = std::fs::metadata(path)
        .map_err(ToolError::internal)?
        .len();

    let doc = lopdf::Document::load(path)
        .map_err(|err| ToolError::extract_failed(format!("unreadable PDF: {err}")))?;
    if doc.is_encrypted() {
        return Err(ToolError::extract_failed("PDF is password-protected"));
    }

    let num_pages = doc.get_pages().len();
    let title = info_string(&doc, b"Title");
    let author = info_string(&doc, b"Author");

    Ok(PdfMetadata {
        title,
        author,
        num_pages,
        file_size,
    })
}

fn reject_encrypted(path: &Path) -> Result<(), ToolError> {
    if let Ok(doc) = lopdf::Document::load(path) {
        if doc.is_encrypted() {
            return Err(ToolError::extract_failed("PDF is password-protected"));
        }
    }
    Ok(())
}

fn info_string(doc: &lopdf::Document, key: &[u8]) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let dict = match info {
        lopdf::Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok()?,
        lopdf::Object::Dictionary(dict) => dict,
        _ => return None,
    };
    match dict.get(key).ok()? {
        lopdf::Object::String(bytes, _) => {
            let decoded = decode_pdf_string(bytes);
            let trimmed = decoded.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

/// PDF text strings are UTF-16BE when they carry a BOM, PDFDocEncoding
/// (treated as Latin-1 here) otherwise.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Finds every occurrence of `needle` in the extracted pages.
///
/// Case-insensitive matching folds ASCII case only. Offsets and snippet
/// bounds are in characters, so multi-byte text never splits a code point.
pub fn search(
    doc: &ExtractedDocument,
    needle: &str,
    case_sensitive: bool,
) -> Vec<SearchHit> {
    let needle_chars: Vec<char> = needle.chars().collect();
    if needle_chars.is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for (page_idx, page) in doc.pages.iter().enumerate() {
        let page_chars: Vec<char> = page.chars().collect();
        if page_chars.len() < needle_chars.len() {
            continue;
        }

        let mut pos = 0;
        while pos + needle_chars.len() <= page_chars.len() {
            let window = &page_chars[pos..pos + needle_chars.len()];
            let matched = if case_sensitive {
                window == needle_chars.as_slice()
            } else {
                window
                    .iter()
                    .zip(&needle_chars)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
            };

            if matched {
                let start = pos.saturating_sub(SNIPPET_CONTEXT);
                let end = (pos + needle_chars.len() + SNIPPET_CONTEXT).min(page_chars.len());
                hits.push(SearchHit {
                    page: page_idx + 1,
                    offset: pos,
                    snippet: page_chars[start..end].iter().collect(),
                });
                pos += needle_chars.len();
            } else {
                pos += 1;
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pages: &[&str]) -> ExtractedDocument {
        ExtractedDocument {
            pages: pages.iter().map(|p| p.to_string()).collect(),
            text: pages.join("\n\n"),
        }
    }

    #[test]
    fn low_yield_detects_sparse_documents() {
        let sparse = doc(&["", "a few words", ""]);
        assert!(sparse.is_low_yield());

        let dense = doc(&[&"lorem ipsum dolor sit amet ".repeat(20)]);
        assert!(!dense.is_low_yield());
    }

    #[test]
    fn empty_document_is_low_yield() {
        assert!(doc(&[]).is_low_yield());
    }

    #[test]
    fn search_reports_page_and_offset() {
        let d = doc(&["nothing here", "the needle sits on page two"]);
        let hits = search(&d, "needle", false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page, 2);
        assert_eq!(hits[0].offset, 4);
        assert!(hits[0].snippet.contains("needle"));
    }

    #[test]
    fn search_case_sensitivity() {
        let d = doc(&["Needle and needle"]);
        assert_eq!(search(&d, "needle", false).len(), 2);
        assert_eq!(search(&d, "needle", true).len(), 1);
        assert_eq!(search(&d, "needle", true)[0].offset, 11);
    }

    #[test]
    fn search_finds_repeated_occurrences() {
        let d = doc(&["abc abc abc"]);
        let hits = search(&d, "abc", true);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].offset, 0);
        assert_eq!(hits[2].offset, 8);
    }

    #[test]
    fn decode_utf16_title() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "Annual Report".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(decode_pdf_string(&bytes), "Annual Report");
    }
}
