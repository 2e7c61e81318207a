use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::types::RetrievalError;

/// Produces embedding vectors for text. The production implementation
/// talks to an embedding server over HTTP; tests substitute deterministic
/// stubs through this trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    /// Name of the model producing the embeddings, for provenance checks.
    fn model_name(&self) -> &str;
}

/// Embedding client for a llama-server instance running with `--embedding`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

/// llama-server replies either with a bare object or a one-element array,
/// depending on version.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Single(EmbeddingPayload),
    Batch(Vec<EmbeddingPayload>),
}

#[derive(Deserialize)]
struct EmbeddingPayload {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let url = format!("{}/embedding", self.endpoint.trim_end_matches('/'));
        debug!("Requesting embedding for {} chars", text.len());

        let response = self
            .client
            .post(&url)
            .json(&json!({ "content": text }))
            .send()
            .await
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RetrievalError::EmbeddingFailed(format!(
                "Embedding server returned HTTP {}", response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

        let embedding = match parsed {
            EmbeddingResponse::Single(payload) => payload.embedding,
            EmbeddingResponse::Batch(mut batch) => {
                if batch.is_empty() {
                    return Err(RetrievalError::EmbeddingFailed(
                        "Embedding server returned an empty batch".to_string(),
                    ));
                }
                batch.swap_remove(0).embedding
            }
        };

        if embedding.is_empty() {
            return Err(RetrievalError::EmbeddingFailed(
                "Embedding server returned an empty vector".to_string(),
            ));
        }

        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
