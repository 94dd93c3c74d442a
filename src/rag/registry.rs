//! Process-global document registry.
//!
//! Coordinates index access across concurrent requests: for any document
//! path the index is built exactly once (single-flight); later callers and
//! concurrent waiters share the same `Arc<DocumentIndex>`. Builds check the
//! on-disk cache first and persist fresh indices atomically. Embedding is
//! the bottleneck, so concurrent builds are capped by a semaphore.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock, Semaphore};

use crate::core::errors::{ErrorKind, ToolError};
use crate::pdf;
use crate::rag::chunker::{chunk_text, ChunkParams};
use crate::rag::embedding::{embed_with_retry, Embedder};
use crate::rag::index::{DocumentIndex, VectorIndex};
use crate::rag::persist;

enum BuildState {
    Building,
    Ready(Arc<DocumentIndex>),
    Failed(ToolError),
}

struct RegistryEntry {
    state: RwLock<BuildState>,
    done: Notify,
}

#[derive(Debug)]
pub struct BuildResult {
    pub index: Arc<DocumentIndex>,
    /// True when this call ran the chunk/embed pipeline (cache miss).
    pub freshly_built: bool,
}

pub struct DocumentRegistry {
    cache_root: PathBuf,
    embedder: Arc<dyn Embedder>,
    chunk_params: ChunkParams,
    entries: Mutex<HashMap<PathBuf, Arc<RegistryEntry>>>,
    build_permits: Semaphore,
}

impl DocumentRegistry {
    pub fn new(
        cache_root: PathBuf,
        embedder: Arc<dyn Embedder>,
        chunk_params: ChunkParams,
        max_concurrent_builds: usize,
    ) -> Self {
        Self {
            cache_root,
            embedder,
            chunk_params,
            entries: Mutex::new(HashMap::new()),
            build_permits: Semaphore::new(max_concurrent_builds.max(1)),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Returns the index for `path`, building it at most once across all
    /// concurrent callers.
    pub async fn get_or_build(&self, path: &Path) -> Result<BuildResult, ToolError> {
        let key = path.to_path_buf();

        let (entry, is_builder) = {
            let mut map = self.entries.lock().await;
            match map.get(&key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let entry = Arc::new(RegistryEntry {
                        state: RwLock::new(BuildState::Building),
                        done: Notify::new(),
                    });
                    map.insert(key.clone(), Arc::clone(&entry));
                    (entry, true)
                }
            }
        };

        if is_builder {
            match self.build(path).await {
                Ok((index, freshly_built)) => {
                    *entry.state.write().await = BuildState::Ready(Arc::clone(&index));
                    entry.done.notify_waiters();
                    Ok(BuildResult {
                        index,
                        freshly_built,
                    })
                }
                Err(err) => {
                    // Drop the entry so a later request can retry the build.
                    self.entries.lock().await.remove(&key);
                    *entry.state.write().await = BuildState::Failed(err.clone());
                    entry.done.notify_waiters();
                    Err(err)
                }
            }
        } else {
            loop {
                let notified = entry.done.notified();
                tokio::pin!(notified);
                {
                    let state = entry.state.read().await;
                    match &*state {
                        BuildState::Ready(index) => {
                            return Ok(BuildResult {
                                index: Arc::clone(index),
                                freshly_built: false,
                            })
                        }
                        BuildState::Failed(err) => return Err(err.clone()),
                        BuildState::Building => {}
                    }
                }
                notified.await;
            }
        }
    }

    /// Drops the in-memory entry and unlinks the cache directory.
    /// Refused while a build for the path is in flight. Returns whether
    /// anything (entry or cache directory) was removed.
    pub async fn remove(&self, path: &Path) -> Result<bool, ToolError> {
        let key = path.to_path_buf();
        let removed = {
            let mut map = self.entries.lock().await;
            if let Some(entry) = map.get(&key) {
                if matches!(&*entry.state.read().await, BuildState::Building) {
                    return Err(ToolError::bad_input(
                        "cannot delete a document while its index is building",
                    ));
                }
            }
            map.remove(&key)
        };

        // The cache key comes from the in-memory entry when one exists;
        // with a cold registry (fresh process) it is re-derived from the
        // file so the on-disk directory still gets unlinked.
        let doc_key = match &removed {
            Some(entry) => match &*entry.state.read().await {
                BuildState::Ready(index) => Some(index.doc_key.clone()),
                _ => None,
            },
            None => {
                let path = key.clone();
                tokio::task::spawn_blocking(move || persist::doc_key(&path))
                    .await
                    .map_err(ToolError::internal)?
                    .ok()
            }
        };

        let mut removed_cache = false;
        if let Some(doc_key) = doc_key {
            let cache_root = self.cache_root.clone();
            removed_cache =
                tokio::task::spawn_blocking(move || persist::remove(&cache_root, &doc_key))
                    .await
                    .map_err(ToolError::internal)??;
        }
        Ok(removed.is_some() || removed_cache)
    }

    async fn build(&self, path: &Path) -> Result<(Arc<DocumentIndex>, bool), ToolError> {
        let doc_key = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || persist::doc_key(&path))
                .await
                .map_err(ToolError::internal)??
        };

        let embedder_id = self.embedder.id().to_string();
        let dim = self.embedder.dim();
        let chunk_params = self.chunk_params;

        let cached = {
            let cache_root = self.cache_root.clone();
            let doc_key = doc_key.clone();
            let embedder_id = embedder_id.clone();
            tokio::task::spawn_blocking(move || {
                persist::load(&cache_root, &doc_key, &embedder_id, dim, chunk_params)
            })
            .await
            .map_err(ToolError::internal)??
        };
        if let Some(index) = cached {
            tracing::info!(%doc_key, "loaded index from cache");
            return Ok((Arc::new(index), false));
        }

        let document = pdf::extract(path).await?;
        if document.is_low_yield() {
            return Err(ToolError::low_yield(format!(
                "extracted only {} characters across {} pages; the PDF looks image-only",
                document.num_characters(),
                document.num_pages()
            )));
        }

        let chunks = chunk_text(&document.text, &doc_key, chunk_params);
        tracing::info!(%doc_key, num_chunks = chunks.len(), "chunked document");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = {
            let _permit = self
                .build_permits
                .acquire()
                .await
                .map_err(|_| ToolError::new(ErrorKind::IndexUnavailable, "registry shut down"))?;
            embed_with_retry(self.embedder.as_ref(), &texts).await?
        };
        if vectors.len() != chunks.len() {
            return Err(ToolError::embed_failed(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let index = DocumentIndex {
            doc_key: doc_key.clone(),
            chunks,
            index: VectorIndex::from_vectors(dim, vectors)?,
            embedder_id,
            chunk_params,
        };
        let index = Arc::new(index);

        // Persist best-effort: the in-memory index is already usable.
        {
            let cache_root = self.cache_root.clone();
            let to_save = Arc::clone(&index);
            let saved = tokio::task::spawn_blocking(move || persist::save(&cache_root, &to_save))
                .await
                .map_err(ToolError::internal)?;
            match saved {
                Ok(dir) => tracing::info!(%doc_key, path = %dir.display(), "persisted index"),
                Err(err) => tracing::warn!(%doc_key, "failed to persist index: {err}"),
            }
        }

        Ok((index, true))
    }
}
