//! In-memory inner-product vector index.
//!
//! Vectors are stored parallel to chunk ordinals: vector `i` embeds chunk
//! `i`. Scores are inner products, which equal cosine similarity because
//! every stored vector is L2-normalized.

use serde::Serialize;

use crate::core::errors::ToolError;
use crate::rag::chunker::{Chunk, ChunkParams};

#[derive(Debug)]
pub struct VectorIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    pub fn from_vectors(dim: usize, vectors: Vec<Vec<f32>>) -> Result<Self, ToolError> {
        let mut index = Self::new(dim);
        index.add_batch(vectors)?;
        Ok(index)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn add_batch(&mut self, vectors: Vec<Vec<f32>>) -> Result<(), ToolError> {
        for vector in &vectors {
            if vector.len() != self.dim {
                return Err(ToolError::internal(format!(
                    "vector dimension mismatch: expected {}, got {}",
                    self.dim,
                    vector.len()
                )));
            }
        }
        self.vectors.extend(vectors);
        Ok(())
    }

    /// Top-k by inner product, descending; ties broken by lower ordinal.
    /// `k` larger than the index returns everything.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, ToolError> {
        if query.len() != self.dim {
            return Err(ToolError::internal(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dim,
                query.len()
            )));
        }

        let mut scores: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(ordinal, vector)| {
                let score: f32 = query.iter().zip(vector).map(|(a, b)| a * b).sum();
                (ordinal, score)
            })
            .collect();

        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scores.truncate(k);
        Ok(scores)
    }
}

/// A chunk returned from retrieval, with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
}

/// Searchable aggregate of one document: chunks, their vectors, and the
/// parameters they were built with.
#[derive(Debug)]
pub struct DocumentIndex {
    pub doc_key: String,
    pub chunks: Vec<Chunk>,
    pub index: VectorIndex,
    pub embedder_id: String,
    pub chunk_params: ChunkParams,
}

impl DocumentIndex {
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, ToolError> {
        let hits = self.index.search(query, k)?;
        Ok(hits
            .into_iter()
            .map(|(ordinal, score)| ScoredChunk {
                chunk: self.chunks[ordinal].clone(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: &[f32]) -> Vec<f32> {
        let mut out = v.to_vec();
        crate::rag::embedding::normalize(&mut out);
        out
    }

    #[test]
    fn search_orders_by_score_descending() {
        let mut index = VectorIndex::new(2);
        index
            .add_batch(vec![
                unit(&[0.8, 0.2]),
                unit(&[0.1, 0.9]),
                unit(&[1.0, 0.0]),
            ])
            .unwrap();

        let hits = index.search(&unit(&[1.0, 0.0]), 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 2);
        assert_eq!(hits[1].0, 0);
        assert_eq!(hits[2].0, 1);
    }

    #[test]
    fn ties_break_by_lower_ordinal() {
        let mut index = VectorIndex::new(2);
        let same = unit(&[1.0, 1.0]);
        index
            .add_batch(vec![same.clone(), same.clone(), same])
            .unwrap();

        let hits = index.search(&unit(&[1.0, 1.0]), 2).unwrap();
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 1);
    }

    #[test]
    fn k_larger_than_index_returns_all() {
        let mut index = VectorIndex::new(2);
        index.add_batch(vec![unit(&[1.0, 0.0])]).unwrap();
        let hits = index.search(&unit(&[1.0, 0.0]), 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn empty_index_returns_empty() {
        let index = VectorIndex::new(2);
        assert!(index.search(&[1.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn larger_k_returns_superset() {
        let mut index = VectorIndex::new(3);
        index
            .add_batch(vec![
                unit(&[1.0, 0.0, 0.0]),
                unit(&[0.0, 1.0, 0.0]),
                unit(&[0.5, 0.5, 0.0]),
                unit(&[0.2, 0.2, 0.9]),
            ])
            .unwrap();

        let query = unit(&[0.9, 0.4, 0.1]);
        let small = index.search(&query, 2).unwrap();
        let large = index.search(&query, 4).unwrap();
        for (ordinal, _) in &small {
            assert!(large.iter().any(|(o, _)| o == ordinal));
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = VectorIndex::new(3);
        assert!(index.add_batch(vec![vec![1.0, 0.0]]).is_err());
        index.add_batch(vec![unit(&[1.0, 0.0, 0.0])]).unwrap();
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }
}
