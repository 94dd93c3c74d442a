//! On-disk index cache.
//!
//! Each document gets one directory under the cache root:
//!
//! ```text
//! cache/<doc_key>/manifest.json   { embedder_id, chunk_params, dim, num_chunks }
//! cache/<doc_key>/chunks.ndjson   one chunk record per line
//! cache/<doc_key>/vectors.bin     dense little-endian f32, row-major
//! ```
//!
//! Writes land in a temp sibling directory and are renamed into place, so
//! a crash never leaves a readable-but-partial cache. A directory without
//! a valid, matching manifest is treated as absent.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{ErrorKind, ToolError};
use crate::rag::chunker::{Chunk, ChunkParams};
use crate::rag::index::{DocumentIndex, VectorIndex};

const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.ndjson";
const VECTORS_FILE: &str = "vectors.bin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub embedder_id: String,
    pub chunk_params: ChunkParams,
    pub dim: usize,
    pub num_chunks: usize,
}

/// Stable cache key for a document: sanitized file stem plus a content
/// fingerprint, so re-uploading changed bytes under the same name gets a
/// fresh index while identical bytes share one.
pub fn doc_key(path: &Path) -> Result<String, ToolError> {
    let bytes = fs::read(path).map_err(|err| {
        ToolError::bad_input(format!("cannot read {}: {err}", path.display()))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    let fingerprint: String = digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect();

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let stem: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .take(48)
        .collect();

    Ok(format!("{stem}-{fingerprint}"))
}

/// Persists an index atomically under `cache_root/<doc_key>/`.
pub fn save(cache_root: &Path, index: &DocumentIndex) -> Result<PathBuf, ToolError> {
    let final_dir = cache_root.join(&index.doc_key);
    let tmp_dir = cache_root.join(format!(".tmp-{}-{}", index.doc_key, std::process::id()));

    if tmp_dir.exists() {
        let _ = fs::remove_dir_all(&tmp_dir);
    }
    fs::create_dir_all(&tmp_dir).map_err(io_err)?;

    let result = write_contents(&tmp_dir, index);
    if let Err(err) = result {
        let _ = fs::remove_dir_all(&tmp_dir);
        return Err(err);
    }

    if final_dir.exists() {
        fs::remove_dir_all(&final_dir).map_err(io_err)?;
    }
    fs::rename(&tmp_dir, &final_dir).map_err(io_err)?;
    Ok(final_dir)
}

fn write_contents(dir: &Path, index: &DocumentIndex) -> Result<(), ToolError> {
    let mut chunks_out = fs::File::create(dir.join(CHUNKS_FILE)).map_err(io_err)?;
    for chunk in &index.chunks {
        let line = serde_json::to_string(chunk).map_err(ToolError::internal)?;
        writeln!(chunks_out, "{line}").map_err(io_err)?;
    }

    let mut vectors_out = fs::File::create(dir.join(VECTORS_FILE)).map_err(io_err)?;
    for vector in index.index.vectors() {
        for value in vector {
            vectors_out.write_all(&value.to_le_bytes()).map_err(io_err)?;
        }
    }

    // Manifest written last: its presence marks the directory complete.
    let manifest = Manifest {
        embedder_id: index.embedder_id.clone(),
        chunk_params: index.chunk_params,
        dim: index.index.dim(),
        num_chunks: index.chunks.len(),
    };
    let manifest_json = serde_json::to_string_pretty(&manifest).map_err(ToolError::internal)?;
    fs::write(dir.join(MANIFEST_FILE), manifest_json).map_err(io_err)?;
    Ok(())
}

/// Loads a cached index if it exists and its manifest matches the expected
/// embedder and chunk parameters. Any absence, mismatch, or inconsistency
/// returns `Ok(None)` so the caller rebuilds.
pub fn load(
    cache_root: &Path,
    doc_key: &str,
    embedder_id: &str,
    dim: usize,
    chunk_params: ChunkParams,
) -> Result<Option<DocumentIndex>, ToolError> {
    let dir = cache_root.join(doc_key);
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Ok(None);
    }

    let manifest: Manifest = match fs::read_to_string(&manifest_path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
    {
        Some(m) => m,
        None => return Ok(None),
    };

    let expected = Manifest {
        embedder_id: embedder_id.to_string(),
        chunk_params,
        dim,
        num_chunks: manifest.num_chunks,
    };
    if manifest != expected {
        tracing::info!(doc_key, "cache manifest mismatch, rebuilding");
        return Ok(None);
    }

    let chunks_file = match fs::File::open(dir.join(CHUNKS_FILE)) {
        Ok(f) => f,
        Err(_) => return Ok(None),
    };
    let mut chunks = Vec::with_capacity(manifest.num_chunks);
    for line in BufReader::new(chunks_file).lines() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Chunk>(&line) {
            Ok(chunk) => chunks.push(chunk),
            Err(_) => return Ok(None),
        }
    }
    if chunks.len() != manifest.num_chunks {
        return Ok(None);
    }

    let bytes = match fs::read(dir.join(VECTORS_FILE)) {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };
    if bytes.len() != manifest.num_chunks * manifest.dim * 4 {
        tracing::warn!(doc_key, "vector file size inconsistent, rebuilding");
        return Ok(None);
    }

    let mut vectors = Vec::with_capacity(manifest.num_chunks);
    for row in bytes.chunks_exact(manifest.dim * 4) {
        let vector: Vec<f32> = row
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        vectors.push(vector);
    }

    let index = VectorIndex::from_vectors(manifest.dim, vectors)?;
    Ok(Some(DocumentIndex {
        doc_key: doc_key.to_string(),
        chunks,
        index,
        embedder_id: manifest.embedder_id,
        chunk_params: manifest.chunk_params,
    }))
}

/// Removes a cached index directory. Returns whether one existed.
pub fn remove(cache_root: &Path, doc_key: &str) -> Result<bool, ToolError> {
    let dir = cache_root.join(doc_key);
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(&dir).map_err(io_err)?;
    Ok(true)
}

fn io_err(err: std::io::Error) -> ToolError {
    ToolError::new(ErrorKind::IndexUnavailable, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::chunker::chunk_text;

    const PARAMS: ChunkParams = ChunkParams {
        chunk_size: 50,
        overlap: 10,
    };

    fn build_index(doc_key: &str) -> DocumentIndex {
        let text = "The capital of Freedonia is Fredonia City. ".repeat(5);
        let chunks = chunk_text(&text, doc_key, PARAMS);
        let vectors: Vec<Vec<f32>> = (0..chunks.len())
            .map(|i| {
                let mut v = vec![0.25f32; 4];
                v[i % 4] = 1.0;
                crate::rag::embedding::normalize(&mut v);
                v
            })
            .collect();
        DocumentIndex {
            doc_key: doc_key.to_string(),
            chunks,
            index: VectorIndex::from_vectors(4, vectors).unwrap(),
            embedder_id: "hash".to_string(),
            chunk_params: PARAMS,
        }
    }

    #[test]
    fn round_trip_preserves_chunks_and_vectors() {
        let tmp = tempfile::tempdir().unwrap();
        let index = build_index("doc-a");
        save(tmp.path(), &index).unwrap();

        let loaded = load(tmp.path(), "doc-a", "hash", 4, PARAMS)
            .unwrap()
            .expect("cache should load");
        assert_eq!(loaded.chunks, index.chunks);
        assert_eq!(loaded.index.vectors(), index.index.vectors());
        assert_eq!(loaded.embedder_id, "hash");
        assert_eq!(loaded.chunk_params, PARAMS);
    }

    #[test]
    fn missing_manifest_means_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let index = build_index("doc-b");
        let dir = save(tmp.path(), &index).unwrap();
        fs::remove_file(dir.join(MANIFEST_FILE)).unwrap();

        assert!(load(tmp.path(), "doc-b", "hash", 4, PARAMS)
            .unwrap()
            .is_none());
    }

    #[test]
    fn embedder_change_invalidates_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let index = build_index("doc-c");
        save(tmp.path(), &index).unwrap();

        assert!(load(tmp.path(), "doc-c", "all-minilm-l6-v2", 4, PARAMS)
            .unwrap()
            .is_none());
    }

    #[test]
    fn chunk_param_change_invalidates_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let index = build_index("doc-d");
        save(tmp.path(), &index).unwrap();

        let other = ChunkParams {
            chunk_size: 51,
            overlap: 10,
        };
        assert!(load(tmp.path(), "doc-d", "hash", 4, other).unwrap().is_none());
    }

    #[test]
    fn truncated_vector_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let index = build_index("doc-e");
        let dir = save(tmp.path(), &index).unwrap();

        let vectors_path = dir.join(VECTORS_FILE);
        let bytes = fs::read(&vectors_path).unwrap();
        fs::write(&vectors_path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(load(tmp.path(), "doc-e", "hash", 4, PARAMS)
            .unwrap()
            .is_none());
    }

    #[test]
    fn remove_deletes_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let index = build_index("doc-f");
        let dir = save(tmp.path(), &index).unwrap();
        assert!(dir.exists());

        assert!(remove(tmp.path(), "doc-f").unwrap());
        assert!(!dir.exists());
        assert!(!remove(tmp.path(), "doc-f").unwrap());
    }

    #[test]
    fn doc_key_changes_with_content() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("report.pdf");
        fs::write(&file, b"first contents").unwrap();
        let key_a = doc_key(&file).unwrap();
        fs::write(&file, b"second contents").unwrap();
        let key_b = doc_key(&file).unwrap();

        assert_ne!(key_a, key_b);
        assert!(key_a.starts_with("report-"));
    }
}
