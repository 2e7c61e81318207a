//! # CGRAG Retrieval Module
//!
//! Supplies document context to queries before inference. A persisted
//! vector index holds embedded chunks of local documents along with the
//! name of the embedding model that produced them; at query time the query
//! text is embedded, candidates are ranked by cosine similarity, filtered
//! by a minimum relevance, and accumulated greedily in rank order until the
//! token budget would be exceeded.
//!
//! Retrieval never fails a query. A missing or unreadable index yields an
//! empty artifact list with a degraded flag; an index built with a
//! different embedding model than the one configured still serves results
//! but surfaces a mismatch warning in response metadata.

mod builder;
mod embedder;
mod index;
mod retriever;
mod types;

pub use builder::{build_index, chunk_text, estimate_tokens, BuildSummary};
pub use embedder::{Embedder, HttpEmbedder};
pub use index::VectorIndex;
pub use retriever::ContextRetriever;
pub use types::{IndexMetadata, IndexedChunk, RetrievalArtifact, RetrievalError, RetrievalResult};
