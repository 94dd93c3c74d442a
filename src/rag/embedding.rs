//! Embedding providers.
//!
//! The embedder is an opaque text → fixed-dimension vector function behind
//! the [`Embedder`] trait. The default provider runs fastembed models
//! locally under `spawn_blocking`; the `hash` provider is a deterministic
//! offline fallback used in development and tests. All outputs are
//! L2-normalized so inner product equals cosine similarity.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::errors::ToolError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identity recorded in the index manifest; changing it
    /// invalidates every cached index.
    fn id(&self) -> &str;

    /// Output vector dimension.
    fn dim(&self) -> usize;

    /// Embeds a batch of texts, one normalized vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ToolError>;
}

/// Resolves a provider from `EMBEDDING_MODEL_ID`.
pub fn create_embedder(model_id: &str) -> Result<Arc<dyn Embedder>, ToolError> {
    if model_id == "hash" {
        return Ok(Arc::new(HashEmbedder::default()));
    }
    Ok(Arc::new(FastembedEmbedder::new(model_id)?))
}

/// Embeds with one internal retry on failure.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, ToolError> {
    match embedder.embed(texts).await {
        Ok(vectors) => Ok(vectors),
        Err(first) => {
            tracing::warn!("embedding failed, retrying once: {first}");
            embedder.embed(texts).await
        }
    }
}

pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

// ============ Local fastembed provider ============

pub struct FastembedEmbedder {
    model_id: String,
    model: fastembed::EmbeddingModel,
    dim: usize,
    // fastembed's TextEmbedding is lazily initialized on first use
    // (initialization may download model weights).
    inner: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl FastembedEmbedder {
    pub fn new(model_id: &str) -> Result<Self, ToolError> {
        let (model, dim) = resolve_model(model_id)?;
        Ok(Self {
            model_id: model_id.to_string(),
            model,
            dim,
            inner: Arc::new(Mutex::new(None)),
        })
    }
}

fn resolve_model(model_id: &str) -> Result<(fastembed::EmbeddingModel, usize), ToolError> {
    let pair = match model_id {
        "all-minilm-l6-v2" => (fastembed::EmbeddingModel::AllMiniLML6V2, 384),
        "bge-small-en-v1.5" => (fastembed::EmbeddingModel::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (fastembed::EmbeddingModel::BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (fastembed::EmbeddingModel::BGELargeENV15, 1024),
        "nomic-embed-text-v1" => (fastembed::EmbeddingModel::NomicEmbedTextV1, 768),
        "nomic-embed-text-v1.5" => (fastembed::EmbeddingModel::NomicEmbedTextV15, 768),
        "multilingual-e5-small" => (fastembed::EmbeddingModel::MultilingualE5Small, 384),
        "multilingual-e5-base" => (fastembed::EmbeddingModel::MultilingualE5Base, 768),
        other => {
            return Err(ToolError::bad_input(format!(
                "unknown embedding model: '{other}'"
            )))
        }
    };
    Ok(pair)
}

#[async_trait]
impl Embedder for FastembedEmbedder {
    fn id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ToolError> {
        let inner = Arc::clone(&self.inner);
        let model = self.model.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| ToolError::embed_failed("embedding model lock poisoned"))?;
            if guard.is_none() {
                let instance = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|err| {
                    ToolError::embed_failed(format!("failed to initialize embedding model: {err}"))
                })?;
                *guard = Some(instance);
            }

            let embedder = guard.as_mut().expect("initialized above");
            let mut vectors = embedder
                .embed(texts, None)
                .map_err(|err| ToolError::embed_failed(format!("embedding failed: {err}")))?;
            for vector in &mut vectors {
                normalize(vector);
            }
            Ok(vectors)
        })
        .await
        .map_err(ToolError::internal)?
    }
}

// ============ Deterministic hash provider ============

/// Token-hashing embedder. Not semantically meaningful, but deterministic,
/// dependency-free, and good enough for lexical-overlap retrieval, which is
/// what the offline development path and the test suite need.
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dim: 128 }
    }
}

impl HashEmbedder {
    pub fn with_dim(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = fnv1a(&token.to_lowercase()) as usize % self.dim;
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        "hash"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ToolError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
