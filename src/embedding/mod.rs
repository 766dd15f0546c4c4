//! Embedding provider abstraction and HTTP implementation
//!
//! The provider contract is `embed_batch`: one vector per input text, at
//! the same index. An empty vector marks a skipped input (blank or
//! whitespace-only text) and callers must not store it.

pub mod breaker;
pub mod resilience;

pub use breaker::CircuitBreaker;
pub use resilience::ResilientEmbeddingClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Trait for batch text embedding.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Embedding dimension, fixed per deployment.
    fn dimension(&self) -> usize;

    /// Embed a batch. Returns exactly one vector per input, in order;
    /// empty vectors mark inputs that were skipped.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/v1/embeddings` provider.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str, dimension: usize) -> Self {
        Self {
            client: crate::http_client::embedding_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimension,
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> Error {
        match status.as_u16() {
            429 => Error::RateLimited(format!("embedding provider: {body}")),
            code => Error::Provider(format!("embedding provider returned {code}: {body}")),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        "http-embeddings"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Blank inputs are never sent; they come back as empty vectors.
        let mut send_indexes = Vec::new();
        let mut send_texts = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            if !text.trim().is_empty() {
                send_indexes.push(i);
                send_texts.push(text.as_str());
            }
        }

        let mut result = vec![Vec::new(); texts.len()];
        if send_texts.is_empty() {
            return Ok(result);
        }

        let request = EmbeddingsRequest {
            model: &self.model,
            input: send_texts,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let parsed: EmbeddingsResponse = response.json().await?;

        for datum in parsed.data {
            let Some(&original) = send_indexes.get(datum.index) else {
                return Err(Error::InvalidData(format!(
                    "embedding response index {} out of range",
                    datum.index
                )));
            };
            if datum.embedding.len() != self.dimension {
                return Err(Error::InvalidData(format!(
                    "embedding dimension {} != configured {}",
                    datum.embedding.len(),
                    self.dimension
                )));
            }
            result[original] = datum.embedding;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = HttpEmbeddingProvider::classify_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down",
        );
        assert!(err.is_rate_limit());

        let err =
            HttpEmbeddingProvider::classify_status(reqwest::StatusCode::BAD_GATEWAY, "oops");
        assert!(err.is_transient());

        let err =
            HttpEmbeddingProvider::classify_status(reqwest::StatusCode::BAD_REQUEST, "nope");
        assert!(!err.is_transient());
    }
}
