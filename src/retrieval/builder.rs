use std::fs;
use std::path::Path;
use std::sync::Arc;
use chrono::Utc;
use tracing::{info, warn};

use super::embedder::Embedder;
use super::index::VectorIndex;
use super::types::{IndexMetadata, IndexedChunk, RetrievalError};

/// Largest chunk the builder will emit, in estimated tokens.
const MAX_CHUNK_TOKENS: usize = 256;

/// Outcome of one index build.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Documents read from the source directory
    pub documents: usize,
    /// Chunks embedded and stored
    pub chunks: usize,
    /// Files skipped (unsupported extension or unreadable)
    pub skipped: usize,
}

/// Rough token estimate at the usual four-characters-per-token ratio.
/// The same estimator sizes chunks at build time and enforces the budget
/// at query time, so the two never disagree.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Splits a document into chunks of at most MAX_CHUNK_TOKENS, breaking on
/// paragraph boundaries. A single paragraph larger than the limit becomes
/// its own oversized chunk rather than being split mid-sentence.
pub fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        let candidate_tokens = estimate_tokens(&current) + estimate_tokens(paragraph);
        if !current.is_empty() && candidate_tokens > MAX_CHUNK_TOKENS {
            chunks.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Builds the vector index from the text documents in a directory.
///
/// Reads every `.txt` and `.md` file at the top level of `docs_dir`, chunks
/// it, embeds each chunk, and writes the index (with embedding-model
/// provenance) to `index_path`.
pub async fn build_index(
    docs_dir: &Path,
    index_path: &Path,
    embedder: Arc<dyn Embedder>,
) -> Result<BuildSummary, RetrievalError> {
    let mut summary = BuildSummary::default();
    let mut chunks: Vec<IndexedChunk> = Vec::new();
    let mut dimension = 0usize;

    let entries = fs::read_dir(docs_dir)
        .map_err(|e| RetrievalError::IndexError(format!(
            "Failed to read documents directory {}: {}", docs_dir.display(), e
        )))?;

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let supported = path
            .extension()
            .map_or(false, |ext| matches!(ext.to_string_lossy().to_lowercase().as_str(), "txt" | "md"));
        if !supported {
            summary.skipped += 1;
            continue;
        }

        let source_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping unreadable document {}: {}", path.display(), e);
                summary.skipped += 1;
                continue;
            }
        };

        summary.documents += 1;

        for piece in chunk_text(&text) {
            let embedding = embedder.embed(&piece).await?;
            if dimension == 0 {
                dimension = embedding.len();
            } else if embedding.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    got: embedding.len(),
                });
            }

            chunks.push(IndexedChunk {
                source_id: source_id.clone(),
                token_count: estimate_tokens(&piece),
                text: piece,
                embedding,
            });
        }
    }

    summary.chunks = chunks.len();

    let metadata = IndexMetadata {
        embedding_model: embedder.model_name().to_string(),
        dimension,
        chunk_count: chunks.len(),
        built_at: Utc::now(),
    };

    let index = VectorIndex::from_chunks(metadata, chunks)?;
    index.save(index_path)?;

    info!(
        "Built vector index at {}: {} documents, {} chunks",
        index_path.display(), summary.documents, summary.chunks
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CountingEmbedder;

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            // Deterministic 2-d vector derived from the text length
            Ok(vec![text.len() as f32, 1.0])
        }

        fn model_name(&self) -> &str {
            "counting-embedder"
        }
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn chunking_respects_paragraph_boundaries() {
        let paragraph = "word ".repeat(150); // ~187 tokens
        let text = format!("{}\n\n{}\n\n{}", paragraph, paragraph, paragraph);
        let chunks = chunk_text(&text);

        // Two paragraphs exceed the limit together, so each lands alone
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(estimate_tokens(chunk) <= MAX_CHUNK_TOKENS);
        }
    }

    #[test]
    fn small_paragraphs_coalesce_into_one_chunk() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Second paragraph."));
    }

    #[tokio::test]
    async fn build_writes_a_loadable_index_with_provenance() {
        let docs = tempfile::tempdir().unwrap();
        fs::write(docs.path().join("alpha.txt"), "Some text about alpha.").unwrap();
        fs::write(docs.path().join("beta.md"), "Notes on beta.").unwrap();
        fs::write(docs.path().join("binary.bin"), "ignored").unwrap();

        let out = tempfile::tempdir().unwrap();
        let index_path = out.path().join("index.json");

        let summary = build_index(docs.path(), &index_path, Arc::new(CountingEmbedder))
            .await
            .unwrap();

        assert_eq!(summary.documents, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.chunks, 2);

        let index = VectorIndex::load(&index_path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.metadata.embedding_model, "counting-embedder");
    }
}
