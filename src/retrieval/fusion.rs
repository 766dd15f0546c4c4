//! RAG-Fusion query expansion and reciprocal-rank merging
//!
//! The LLM rewrites the question into several diverse paraphrases and
//! sub-queries; retrieval runs once per variant and the candidate lists
//! merge by reciprocal-rank fusion, collapsing duplicates.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{parse_json_response, LlmRequest, LlmRouter, PromptRegistry};

const MAX_VARIANTS: usize = 5;
const RRF_K: f64 = 60.0;

#[derive(Debug, Deserialize)]
struct FusionReply {
    queries: Vec<String>,
}

pub struct QueryExpander {
    router: Arc<LlmRouter>,
    prompts: Arc<PromptRegistry>,
}

impl QueryExpander {
    pub fn new(router: Arc<LlmRouter>, prompts: Arc<PromptRegistry>) -> Self {
        Self { router, prompts }
    }

    /// Expand a question into up to five query variants. The original
    /// question is always the first variant; expansion trouble degrades
    /// to just the original.
    pub async fn expand(&self, question: &str) -> Vec<String> {
        let mut variants = vec![question.to_string()];

        let Some(system) = self.prompts.resolve("fusion", "default", "ru") else {
            return variants;
        };

        let response = match self
            .router
            .complete(&LlmRequest::new(system, question).with_temperature(0.6))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Query expansion failed, searching with original only: {e}");
                return variants;
            }
        };

        match parse_json_response::<FusionReply>(&response.content) {
            Ok(reply) => {
                for query in reply.queries {
                    let query = query.trim().to_string();
                    if query.is_empty() || variants.iter().any(|v| v == &query) {
                        continue;
                    }
                    variants.push(query);
                    if variants.len() >= MAX_VARIANTS {
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Fusion reply unparseable, searching with original only: {e}");
            }
        }

        variants
    }
}

/// Merge several ranked lists by reciprocal-rank fusion.
///
/// Duplicates collapse onto one key accumulating `1 / (k + rank)` per
/// list; the result is sorted by fused score descending.
pub fn rrf_merge<K: Eq + Hash + Clone>(rankings: &[Vec<K>]) -> Vec<(K, f64)> {
    let mut scores: HashMap<K, f64> = HashMap::new();
    let mut first_seen: HashMap<K, usize> = HashMap::new();

    let mut order = 0usize;
    for ranking in rankings {
        for (rank, key) in ranking.iter().enumerate() {
            *scores.entry(key.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
            first_seen.entry(key.clone()).or_insert_with(|| {
                order += 1;
                order
            });
        }
    }

    let mut merged: Vec<(K, f64)> = scores.into_iter().collect();
    // Stable order for equal scores: first appearance wins.
    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| first_seen[&a.0].cmp(&first_seen[&b.0]))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrf_prefers_items_in_many_lists() {
        let rankings = vec![
            vec!["a", "b", "c"],
            vec!["b", "d"],
            vec!["b", "a"],
        ];
        let merged = rrf_merge(&rankings);
        assert_eq!(merged[0].0, "b");
        assert_eq!(merged[1].0, "a");
    }

    #[test]
    fn test_rrf_collapses_duplicates() {
        let rankings = vec![vec![1, 2], vec![2, 1]];
        let merged = rrf_merge(&rankings);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_rrf_empty_input() {
        let merged: Vec<(i32, f64)> = rrf_merge(&[]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_rrf_rank_matters_within_one_list() {
        let rankings = vec![vec!["first", "second", "third"]];
        let merged = rrf_merge(&rankings);
        assert_eq!(merged[0].0, "first");
        assert!(merged[0].1 > merged[1].1);
    }
}
