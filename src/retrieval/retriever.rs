use std::sync::Arc;
use tracing::{info, warn};

use super::embedder::Embedder;
use super::index::VectorIndex;
use super::types::{RetrievalArtifact, RetrievalResult};
use crate::config::RetrievalConfig;

/// Retrieves ranked context artifacts for a query under a token budget.
///
/// Each call is a fresh retrieval: the query is embedded, candidates are
/// ranked, filtered by minimum relevance, and accumulated greedily in rank
/// order. Accumulation stops at the first candidate that would push the
/// running token count past the budget, even if a later, smaller candidate
/// would still fit: truncation by rank, not optimal packing.
pub struct ContextRetriever {
    index: Option<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    expected_model: String,
}

impl ContextRetriever {
    /// Opens the configured index, degrading gracefully when it is absent.
    pub fn open(config: &RetrievalConfig, embedder: Arc<dyn Embedder>) -> Self {
        let index = match VectorIndex::load(&config.index_path) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!(
                    "Vector index unavailable, queries will run without context: {}", e
                );
                None
            }
        };

        Self {
            index,
            embedder,
            expected_model: config.embedding_model.clone(),
        }
    }

    /// Builds a retriever directly from parts. Used by tests and the index
    /// builder path.
    pub fn with_index(index: Option<VectorIndex>, embedder: Arc<dyn Embedder>, expected_model: String) -> Self {
        Self { index, embedder, expected_model }
    }

    /// Whether an index is loaded.
    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Retrieves context for the query.
    ///
    /// Never fails: any unavailability is reported through the degraded
    /// flag and an empty artifact list, and the query proceeds without
    /// context.
    pub async fn retrieve(
        &self,
        query_text: &str,
        token_budget: usize,
        min_relevance: f32,
    ) -> RetrievalResult {
        let index = match &self.index {
            Some(index) => index,
            None => {
                warn!("Retrieval requested but no vector index is loaded; continuing without context");
                return RetrievalResult::degraded();
            }
        };

        // An index built with a different embedding model still serves, but
        // relevance scores are suspect; surface the mismatch to the caller.
        let model_mismatch = if index.metadata.embedding_model != self.expected_model {
            let msg = format!(
                "Index was built with embedding model '{}' but '{}' is configured",
                index.metadata.embedding_model, self.expected_model
            );
            warn!("{}", msg);
            Some(msg)
        } else {
            None
        };

        let query_embedding = match self.embedder.embed(query_text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Query embedding failed, continuing without context: {}", e);
                return RetrievalResult::degraded();
            }
        };

        let ranked = match index.search(&query_embedding) {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!("Index search failed, continuing without context: {}", e);
                return RetrievalResult::degraded();
            }
        };

        // Greedy accumulation in rank order under the token budget.
        let mut artifacts = Vec::new();
        let mut used_tokens = 0usize;
        for (relevance, chunk) in ranked {
            if relevance < min_relevance {
                // Candidates are sorted, so everything after is below too
                break;
            }
            if used_tokens + chunk.token_count > token_budget {
                break;
            }
            used_tokens += chunk.token_count;
            artifacts.push(RetrievalArtifact {
                source_id: chunk.source_id.clone(),
                text: chunk.text.clone(),
                relevance,
                token_count: chunk.token_count,
            });
        }

        info!(
            "Retrieved {} artifacts ({} tokens of budget {})",
            artifacts.len(), used_tokens, token_budget
        );

        RetrievalResult {
            artifacts,
            degraded: false,
            model_mismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::types::{IndexMetadata, IndexedChunk, RetrievalError};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Deterministic embedder returning a fixed vector for any input.
    struct FixedEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
            Ok(self.vector.clone())
        }

        fn model_name(&self) -> &str {
            "test-embedder"
        }
    }

    /// Embedder that always fails, for degraded-path tests.
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
            Err(RetrievalError::EmbeddingFailed("no embedding server".to_string()))
        }

        fn model_name(&self) -> &str {
            "test-embedder"
        }
    }

    fn chunk(source_id: &str, token_count: usize, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            source_id: source_id.to_string(),
            text: format!("text of {}", source_id),
            token_count,
            embedding,
        }
    }

    fn index_with(chunks: Vec<IndexedChunk>, model: &str) -> VectorIndex {
        let metadata = IndexMetadata {
            embedding_model: model.to_string(),
            dimension: 2,
            chunk_count: chunks.len(),
            built_at: Utc::now(),
        };
        VectorIndex::from_chunks(metadata, chunks).unwrap()
    }

    fn retriever(chunks: Vec<IndexedChunk>) -> ContextRetriever {
        ContextRetriever::with_index(
            Some(index_with(chunks, "test-embedder")),
            Arc::new(FixedEmbedder { vector: vec![1.0, 0.0] }),
            "test-embedder".to_string(),
        )
    }

    // Five candidates of 40 tokens each in strictly decreasing relevance.
    fn five_forty_token_chunks() -> Vec<IndexedChunk> {
        vec![
            chunk("doc-1", 40, vec![1.0, 0.00]),
            chunk("doc-2", 40, vec![1.0, 0.25]),
            chunk("doc-3", 40, vec![1.0, 0.50]),
            chunk("doc-4", 40, vec![1.0, 0.75]),
            chunk("doc-5", 40, vec![1.0, 1.00]),
        ]
    }

    #[tokio::test]
    async fn budget_admits_exactly_two_forty_token_artifacts_under_one_hundred() {
        let retriever = retriever(five_forty_token_chunks());
        let result = retriever.retrieve("query", 100, 0.1).await;

        assert!(!result.degraded);
        assert_eq!(result.artifacts.len(), 2);
        assert_eq!(result.artifacts[0].source_id, "doc-1");
        assert_eq!(result.artifacts[1].source_id, "doc-2");
        let total: usize = result.artifacts.iter().map(|a| a.token_count).sum();
        assert!(total <= 100);
    }

    #[tokio::test]
    async fn truncation_stops_at_first_overflow_even_if_a_later_chunk_fits() {
        let retriever = retriever(vec![
            chunk("doc-big", 60, vec![1.0, 0.0]),
            chunk("doc-wide", 50, vec![1.0, 0.2]),
            chunk("doc-small", 30, vec![1.0, 0.4]),
        ]);
        let result = retriever.retrieve("query", 100, 0.1).await;

        // doc-wide overflows at 110 and retrieval stops there; doc-small
        // would have fit but rank order wins over packing.
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].source_id, "doc-big");
    }

    #[tokio::test]
    async fn candidates_below_min_relevance_are_excluded() {
        let retriever = retriever(vec![
            chunk("doc-aligned", 40, vec![1.0, 0.0]),
            chunk("doc-orthogonal", 40, vec![0.0, 1.0]),
        ]);
        let result = retriever.retrieve("query", 1000, 0.5).await;

        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].source_id, "doc-aligned");
        assert!(result.artifacts.iter().all(|a| a.relevance >= 0.5));
    }

    #[tokio::test]
    async fn repeated_retrieval_over_unchanged_index_is_identical() {
        let retriever = retriever(five_forty_token_chunks());
        let first = retriever.retrieve("query", 200, 0.1).await;
        let second = retriever.retrieve("query", 200, 0.1).await;

        let first_ids: Vec<&str> = first.artifacts.iter().map(|a| a.source_id.as_str()).collect();
        let second_ids: Vec<&str> = second.artifacts.iter().map(|a| a.source_id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn missing_index_degrades_to_empty_result() {
        let retriever = ContextRetriever::with_index(
            None,
            Arc::new(FixedEmbedder { vector: vec![1.0, 0.0] }),
            "test-embedder".to_string(),
        );
        let result = retriever.retrieve("query", 100, 0.1).await;

        assert!(result.degraded);
        assert!(result.artifacts.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_empty_result() {
        let retriever = ContextRetriever::with_index(
            Some(index_with(five_forty_token_chunks(), "test-embedder")),
            Arc::new(BrokenEmbedder),
            "test-embedder".to_string(),
        );
        let result = retriever.retrieve("query", 100, 0.1).await;

        assert!(result.degraded);
        assert!(result.artifacts.is_empty());
    }

    #[tokio::test]
    async fn model_mismatch_is_surfaced_but_not_fatal() {
        let retriever = ContextRetriever::with_index(
            Some(index_with(five_forty_token_chunks(), "some-older-model")),
            Arc::new(FixedEmbedder { vector: vec![1.0, 0.0] }),
            "test-embedder".to_string(),
        );
        let result = retriever.retrieve("query", 100, 0.1).await;

        assert!(!result.degraded);
        assert!(result.model_mismatch.is_some());
        assert_eq!(result.artifacts.len(), 2);
    }
}
