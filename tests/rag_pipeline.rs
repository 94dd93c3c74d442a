//! Registry and persistence behavior across the whole retrieval pipeline,
//! using the deterministic hash embedder wrapped with an invocation counter.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use pdfqa::core::errors::{ErrorKind, ToolError};
use pdfqa::rag::chunker::ChunkParams;
use pdfqa::rag::embedding::{Embedder, HashEmbedder};
use pdfqa::rag::registry::DocumentRegistry;

const PARAMS: ChunkParams = ChunkParams {
    chunk_size: 120,
    overlap: 24,
};

/// Counts batch embed calls so tests can assert single-flight behavior.
struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            inner: HashEmbedder::default(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers pile up before the build finishes.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        self.inner.embed(texts).await
    }
}

/// The extractor only accepts real PDFs, so tests feed it a minimal
/// single-page PDF with a text object.
fn write_test_pdf(path: &Path, text: &str) {
    let escaped = text.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
    let stream = format!("BT /F1 12 Tf 72 720 Td ({escaped}) Tj ET");
    let mut objects = Vec::new();
    objects.push("1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n".to_string());
    objects.push(
        "2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n".to_string(),
    );
    objects.push(
        "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>\nendobj\n"
            .to_string(),
    );
    objects.push(
        "4 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>\nendobj\n".to_string(),
    );
    objects.push(format!(
        "5 0 obj\n<< /Length {} >>\nstream\n{stream}\nendstream\nendobj\n",
        stream.len()
    ));

    let mut body = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for obj in &objects {
        offsets.push(body.len());
        body.push_str(obj);
    }
    let xref_at = body.len();
    body.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    body.push_str("0000000000 65535 f \n");
    for offset in &offsets {
        body.push_str(&format!("{offset:010} 00000 n \n"));
    }
    body.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    ));
    std::fs::write(path, body).unwrap();
}

fn registry_with(
    cache_root: PathBuf,
    embedder: Arc<dyn Embedder>,
) -> DocumentRegistry {
    DocumentRegistry::new(cache_root, embedder, PARAMS, 2)
}

fn dense_text() -> String {
    "The capital of Freedonia is Fredonia City. Its parliament meets weekly. ".repeat(4)
}

#[tokio::test]
async fn concurrent_builds_are_single_flight() {
    let tmp = tempfile::tempdir().unwrap();
    let pdf = tmp.path().join("doc.pdf");
    write_test_pdf(&pdf, &dense_text());

    let embedder = Arc::new(CountingEmbedder::new());
    let registry = Arc::new(registry_with(
        tmp.path().join("cache"),
        Arc::clone(&embedder) as Arc<dyn Embedder>,
    ));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let registry = Arc::clone(&registry);
        let pdf = pdf.clone();
        handles.push(tokio::spawn(
            async move { registry.get_or_build(&pdf).await },
        ));
    }

    let mut indices = Vec::new();
    for handle in handles {
        let built = handle.await.unwrap().expect("build should succeed");
        indices.push(built.index);
    }

    // Document chunks were embedded exactly once across all ten callers.
    assert_eq!(embedder.calls(), 1);
    for index in &indices {
        assert!(Arc::ptr_eq(index, &indices[0]));
    }
}

#[tokio::test]
async fn cache_reload_skips_embedding() {
    let tmp = tempfile::tempdir().unwrap();
    let pdf = tmp.path().join("doc.pdf");
    write_test_pdf(&pdf, &dense_text());
    let cache_root = tmp.path().join("cache");

    let first_embedder = Arc::new(CountingEmbedder::new());
    let registry = registry_with(
        cache_root.clone(),
        Arc::clone(&first_embedder) as Arc<dyn Embedder>,
    );
    let first = registry.get_or_build(&pdf).await.unwrap();
    assert!(first.freshly_built);
    assert_eq!(first_embedder.calls(), 1);

    // A fresh registry (fresh process) with the same parameters loads the
    // persisted index without touching the embedder.
    let second_embedder = Arc::new(CountingEmbedder::new());
    let registry = registry_with(
        cache_root,
        Arc::clone(&second_embedder) as Arc<dyn Embedder>,
    );
    let second = registry.get_or_build(&pdf).await.unwrap();
    assert!(!second.freshly_built);
    assert_eq!(second_embedder.calls(), 0);
    assert_eq!(second.index.num_chunks(), first.index.num_chunks());
}

#[tokio::test]
async fn changed_chunk_params_force_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let pdf = tmp.path().join("doc.pdf");
    write_test_pdf(&pdf, &dense_text());
    let cache_root = tmp.path().join("cache");

    let registry = registry_with(
        cache_root.clone(),
        Arc::new(HashEmbedder::default()) as Arc<dyn Embedder>,
    );
    registry.get_or_build(&pdf).await.unwrap();

    let other_params = ChunkParams {
        chunk_size: 80,
        overlap: 16,
    };
    let embedder = Arc::new(CountingEmbedder::new());
    let registry = DocumentRegistry::new(
        cache_root,
        Arc::clone(&embedder) as Arc<dyn Embedder>,
        other_params,
        2,
    );
    let rebuilt = registry.get_or_build(&pdf).await.unwrap();
    assert!(rebuilt.freshly_built);
    assert_eq!(embedder.calls(), 1);
}

#[tokio::test]
async fn low_yield_document_is_refused_without_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let pdf = tmp.path().join("scan.pdf");
    write_test_pdf(&pdf, "x");
    let cache_root = tmp.path().join("cache");
    std::fs::create_dir_all(&cache_root).unwrap();

    let registry = registry_with(
        cache_root.clone(),
        Arc::new(HashEmbedder::default()) as Arc<dyn Embedder>,
    );
    let err = registry.get_or_build(&pdf).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::LowYield);

    // No cache directory was created for the refused document.
    let entries: Vec<_> = std::fs::read_dir(&cache_root).unwrap().collect();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn retrieval_finds_the_relevant_chunk() {
    let tmp = tempfile::tempdir().unwrap();
    let pdf = tmp.path().join("doc.pdf");
    let mut text = "Nothing noteworthy happens in this filler sentence about weather patterns. "
        .repeat(3);
    text.push_str("The capital of Freedonia is Fredonia City. ");
    text.push_str(&"More filler prose about agriculture and trade routes follows here. ".repeat(3));
    write_test_pdf(&pdf, &text);

    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
    let registry = registry_with(tmp.path().join("cache"), Arc::clone(&embedder));
    let built = registry.get_or_build(&pdf).await.unwrap();

    let query = embedder
        .embed(&["What is the capital of Freedonia?".to_string()])
        .await
        .unwrap()
        .remove(0);
    let hits = built.index.search(&query, 2).unwrap();
    assert!(!hits.is_empty());
    assert!(
        hits[0].chunk.text.contains("Freedonia"),
        "top chunk should mention Freedonia, got: {}",
        hits[0].chunk.text
    );
}

#[tokio::test]
async fn remove_drops_entry_and_cache_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let pdf = tmp.path().join("doc.pdf");
    write_test_pdf(&pdf, &dense_text());
    let cache_root = tmp.path().join("cache");

    let registry = registry_with(
        cache_root.clone(),
        Arc::new(HashEmbedder::default()) as Arc<dyn Embedder>,
    );
    registry.get_or_build(&pdf).await.unwrap();
    assert!(std::fs::read_dir(&cache_root).unwrap().count() > 0);

    assert!(registry.remove(&pdf).await.unwrap());
    assert_eq!(std::fs::read_dir(&cache_root).unwrap().count(), 0);
    assert!(!registry.remove(&pdf).await.unwrap());
}

#[tokio::test]
async fn remove_unlinks_cache_left_by_a_previous_process() {
    let tmp = tempfile::tempdir().unwrap();
    let pdf = tmp.path().join("doc.pdf");
    write_test_pdf(&pdf, &dense_text());
    let cache_root = tmp.path().join("cache");

    let registry = registry_with(
        cache_root.clone(),
        Arc::new(HashEmbedder::default()) as Arc<dyn Embedder>,
    );
    registry.get_or_build(&pdf).await.unwrap();
    assert!(std::fs::read_dir(&cache_root).unwrap().count() > 0);

    // A fresh registry has no in-memory entry for the path, but the
    // on-disk directory from the earlier build still gets cleaned up.
    let registry = registry_with(
        cache_root.clone(),
        Arc::new(HashEmbedder::default()) as Arc<dyn Embedder>,
    );
    assert!(registry.remove(&pdf).await.unwrap());
    assert_eq!(std::fs::read_dir(&cache_root).unwrap().count(), 0);
}
