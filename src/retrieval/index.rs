use std::fs;
use std::path::Path;
use ndarray::ArrayView1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::types::{IndexMetadata, IndexedChunk, RetrievalError};

/// On-disk representation of the index.
#[derive(Serialize, Deserialize)]
struct IndexFile {
    metadata: IndexMetadata,
    chunks: Vec<IndexedChunk>,
}

/// A loaded vector index: embedded chunks plus provenance metadata,
/// searched by exact cosine similarity. At the scale of a local document
/// collection an exact scan outperforms the bookkeeping of an approximate
/// structure.
pub struct VectorIndex {
    /// Provenance metadata from build time
    pub metadata: IndexMetadata,
    chunks: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Creates an index from chunks produced by the builder.
    pub fn from_chunks(metadata: IndexMetadata, chunks: Vec<IndexedChunk>) -> Result<Self, RetrievalError> {
        for chunk in &chunks {
            if chunk.embedding.len() != metadata.dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: metadata.dimension,
                    got: chunk.embedding.len(),
                });
            }
        }
        Ok(Self { metadata, chunks })
    }

    /// Loads a persisted index.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RetrievalError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RetrievalError::IndexMissing(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| RetrievalError::IndexError(e.to_string()))?;
        let file: IndexFile = serde_json::from_str(&content)
            .map_err(|e| RetrievalError::IndexError(e.to_string()))?;

        info!(
            "Loaded vector index: {} chunks, model {}, dimension {}",
            file.chunks.len(), file.metadata.embedding_model, file.metadata.dimension
        );

        Self::from_chunks(file.metadata, file.chunks)
    }

    /// Persists the index.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RetrievalError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RetrievalError::IndexError(e.to_string()))?;
        }

        let file = IndexFile {
            metadata: self.metadata.clone(),
            chunks: self.chunks.clone(),
        };
        let content = serde_json::to_string(&file)
            .map_err(|e| RetrievalError::IndexError(e.to_string()))?;
        fs::write(path, content).map_err(|e| RetrievalError::IndexError(e.to_string()))?;

        Ok(())
    }

    /// Number of chunks in the index.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Ranks every chunk against the query embedding, descending by
    /// relevance. Ties break on source id so repeated searches over an
    /// unchanged index return an identical ordering.
    pub fn search(&self, query_embedding: &[f32]) -> Result<Vec<(f32, &IndexedChunk)>, RetrievalError> {
        if query_embedding.len() != self.metadata.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.metadata.dimension,
                got: query_embedding.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .par_iter()
            .map(|chunk| (relevance(query_embedding, &chunk.embedding), chunk))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.source_id.cmp(&b.1.source_id))
        });

        Ok(scored)
    }
}

/// Cosine similarity clamped into 0.0..=1.0. Negative similarity carries no
/// useful ranking signal for retrieval, so it floors at zero.
fn relevance(a: &[f32], b: &[f32]) -> f32 {
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);

    let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    (a.dot(&b) / denom).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(source_id: &str, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            source_id: source_id.to_string(),
            text: format!("chunk from {}", source_id),
            token_count: 40,
            embedding,
        }
    }

    fn index(chunks: Vec<IndexedChunk>) -> VectorIndex {
        let metadata = IndexMetadata {
            embedding_model: "test-embedder".to_string(),
            dimension: 2,
            chunk_count: chunks.len(),
            built_at: Utc::now(),
        };
        VectorIndex::from_chunks(metadata, chunks).unwrap()
    }

    #[test]
    fn search_ranks_by_cosine_descending() {
        let idx = index(vec![
            chunk("far", vec![0.0, 1.0]),
            chunk("near", vec![1.0, 0.0]),
            chunk("mid", vec![0.7, 0.7]),
        ]);

        let ranked = idx.search(&[1.0, 0.0]).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|(_, c)| c.source_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!(ranked[0].0 > ranked[1].0);
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let idx = index(vec![chunk("a", vec![1.0, 0.0])]);
        assert!(matches!(
            idx.search(&[1.0, 0.0, 0.0]),
            Err(RetrievalError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn load_reports_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrievalError::IndexMissing(_))
        ));
    }

    #[test]
    fn save_and_load_round_trip_preserves_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let idx = index(vec![chunk("a", vec![1.0, 0.0]), chunk("b", vec![0.0, 1.0])]);
        idx.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.metadata.embedding_model, "test-embedder");
        assert_eq!(loaded.metadata.dimension, 2);
    }

    #[test]
    fn corrupt_index_reports_index_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrievalError::IndexError(_))
        ));
    }
}
