//! Text chunking for retrieval.
//!
//! Splits a document into overlapping windows, preferring to end each
//! window at a paragraph break, line break, sentence boundary, or space
//! found inside the window's overlap tail. Output is a pure function of
//! the input text and parameters.

use serde::{Deserialize, Serialize};

/// Separators in preference order; the first one found in the overlap
/// tail of a window decides the cut.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

impl ChunkParams {
    /// Parameters clamped to sane bounds: a window holds at least one
    /// character and the overlap never reaches half the window.
    fn normalized(self) -> Self {
        let chunk_size = self.chunk_size.max(1);
        Self {
            chunk_size,
            overlap: self.overlap.min(chunk_size / 2),
        }
    }
}

/// One retrieval unit: a contiguous slice of the extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    /// Offset of the chunk start within the document, in characters.
    pub char_offset: usize,
}

/// Splits `text` into overlapping chunks.
///
/// Consecutive chunks share exactly `overlap` characters, so any span of
/// at most `overlap` characters appears intact in at least one chunk.
/// No chunk exceeds `chunk_size` characters.
pub fn chunk_text(text: &str, document_id: &str, params: ChunkParams) -> Vec<Chunk> {
    let params = params.normalized();
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    if total == 0 {
        return chunks;
    }

    let mut start = 0;
    let mut ordinal = 0;

    loop {
        let window_end = (start + params.chunk_size).min(total);

        let end = if window_end == total {
            total
        } else {
            let tail_start = window_end.saturating_sub(params.overlap).max(start + 1);
            cut_at_separator(&chars, tail_start, window_end).unwrap_or(window_end)
        };

        chunks.push(Chunk {
            id: format!("{document_id}-{ordinal:04}"),
            document_id: document_id.to_string(),
            ordinal,
            text: chars[start..end].iter().collect(),
            char_offset: start,
        });

        if end == total {
            break;
        }

        start = (end - params.overlap).max(start + 1);
        ordinal += 1;
    }

    chunks
}

/// Looks for the highest-priority separator inside `[from, to)` and
/// returns the cut position just past its last occurrence.
fn cut_at_separator(chars: &[char], from: usize, to: usize) -> Option<usize> {
    for sep in SEPARATORS {
        let sep_chars: Vec<char> = sep.chars().collect();
        let mut found = None;
        let mut pos = from;
        while pos + sep_chars.len() <= to {
            if chars[pos..pos + sep_chars.len()] == sep_chars[..] {
                found = Some(pos + sep_chars.len());
            }
            pos += 1;
        }
        if found.is_some() {
            return found;
        }
    }
    None
}
