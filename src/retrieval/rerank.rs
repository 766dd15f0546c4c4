//! Cross-encoder reranking
//!
//! Second retrieval stage: scores (query, candidate) pairs jointly after
//! the fast first-stage retriever. A disabled provider returns
//! pass-through scores so the engine code has one path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Candidates scored per request.
pub const RERANK_TOP: usize = 40;

/// Candidates scoring below this are dropped.
pub const RERANK_SCORE_FLOOR: f32 = 0.1;

#[async_trait]
pub trait RerankProvider: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    /// One relevance score in [0, 1] per candidate, at the same index.
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

/// Pass-through provider used when reranking is switched off.
pub struct DisabledReranker;

#[async_trait]
impl RerankProvider for DisabledReranker {
    fn name(&self) -> &str {
        "disabled"
    }

    fn enabled(&self) -> bool {
        false
    }

    async fn rerank(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        Ok(vec![1.0; candidates.len()])
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// HTTP cross-encoder speaking the common `/rerank` dialect.
pub struct HttpRerankProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpRerankProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: crate::http_client::embedding_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl RerankProvider for HttpRerankProvider {
    fn name(&self) -> &str {
        "http-rerank"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            model: &self.model,
            query,
            documents: candidates,
        };

        let mut builder = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => Error::RateLimited(format!("rerank provider: {body}")),
                code => Error::Provider(format!("rerank provider returned {code}: {body}")),
            });
        }

        let parsed: RerankResponse = response.json().await?;

        let mut scores = vec![0.0; candidates.len()];
        for result in parsed.results {
            if result.index >= scores.len() {
                return Err(Error::InvalidData(format!(
                    "rerank response index {} out of range",
                    result.index
                )));
            }
            scores[result.index] = result.relevance_score;
        }

        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_reranker_passes_through() {
        let reranker = DisabledReranker;
        let scores = reranker
            .rerank("q", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(scores, vec![1.0, 1.0]);
        assert!(!reranker.enabled());
    }
}
