use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use chrono::{serde::ts_seconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One context chunk returned to a query.
///
/// Invariants: `relevance` is at least the configured minimum, and the sum
/// of `token_count` across all artifacts returned for one query never
/// exceeds the token budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalArtifact {
    /// Identifier of the source document
    pub source_id: String,
    /// The chunk text itself
    pub text: String,
    /// Similarity to the query, in 0.0..=1.0
    pub relevance: f32,
    /// Estimated token count of the chunk
    pub token_count: usize,
}

/// One embedded chunk stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// Identifier of the source document
    pub source_id: String,
    /// The chunk text
    pub text: String,
    /// Estimated token count, computed at build time
    pub token_count: usize,
    /// Embedding vector for the chunk
    pub embedding: Vec<f32>,
}

/// Provenance metadata stored alongside the chunks. The embedding model
/// name is compared against the active configuration to detect an index
/// built with a different model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Name of the embedding model the index was built with
    pub embedding_model: String,
    /// Dimension of every embedding in the index
    pub dimension: usize,
    /// Number of chunks stored
    pub chunk_count: usize,
    /// When the index was built
    #[serde(with = "ts_seconds")]
    pub built_at: DateTime<Utc>,
}

/// Result of one retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Artifacts in descending relevance order
    pub artifacts: Vec<RetrievalArtifact>,
    /// True when the index was unavailable or embedding failed and the
    /// query proceeded without context
    pub degraded: bool,
    /// Warning text when the index was built with a different embedding
    /// model than the one configured
    pub model_mismatch: Option<String>,
}

impl RetrievalResult {
    /// An empty result marking retrieval as degraded.
    pub fn degraded() -> Self {
        Self {
            artifacts: Vec::new(),
            degraded: true,
            model_mismatch: None,
        }
    }
}

/// Custom error types for retrieval operations
#[derive(Debug)]
pub enum RetrievalError {
    /// No index file exists at the configured path
    IndexMissing(PathBuf),
    /// The index file exists but could not be read or parsed
    IndexError(String),
    /// The embedding endpoint failed or returned an unusable payload
    EmbeddingFailed(String),
    /// A vector's dimension disagrees with the index metadata
    DimensionMismatch { expected: usize, got: usize },
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RetrievalError::IndexMissing(path) => {
                write!(f, "Vector index not found at: {}", path.display())
            }
            RetrievalError::IndexError(msg) => write!(f, "Vector index error: {}", msg),
            RetrievalError::EmbeddingFailed(msg) => write!(f, "Embedding failed: {}", msg),
            RetrievalError::DimensionMismatch { expected, got } => {
                write!(f, "Embedding dimension mismatch: index has {}, got {}", expected, got)
            }
        }
    }
}

impl Error for RetrievalError {}
