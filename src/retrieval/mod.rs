//! Hybrid retrieval engine
//!
//! search(chat, query) = intent classification → RAG-fusion expansion →
//! strategy-specific candidate gathering (vector kNN + lexical full-text)
//! → reciprocal-rank fusion → cross-encoder rerank → confidence
//! evaluation. Partial failures degrade gracefully: a dead reranker skips
//! reranking, a dead embedder leaves lexical-only retrieval; only the
//! final LLM call can abort a request.

pub mod answer;
pub mod confidence;
pub mod context;
pub mod fusion;
pub mod html;
pub mod intent;
pub mod rerank;
pub mod search;

pub use answer::{AnswerGenerator, AnswerRequest, GateDecision};
pub use confidence::{ConfidenceLevel, ConfidencePolicy, ConfidenceReport};
pub use context::ContextBuilder;
pub use intent::{Intent, IntentClassifier, IntentKind};
pub use rerank::{DisabledReranker, HttpRerankProvider, RerankProvider};
pub use search::{Candidate, CandidateSource, HybridSearcher};

use std::collections::HashMap;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::profile::AliasService;

use fusion::{rrf_merge, QueryExpander};
use rerank::{RERANK_SCORE_FLOOR, RERANK_TOP};
use search::{LEXICAL_TOP_L, VECTOR_TOP_K};

/// Final candidates handed to the context builder.
const FINAL_TOP: usize = 12;

/// A retrieval request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub chat_id: i64,
    pub asker_user_id: i64,
    pub asker_display_name: String,
    pub asker_username: Option<String>,
    pub question: String,
}

/// Everything downstream consumers need: ranked candidates, the intent
/// that drove the strategy and the confidence verdict.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub candidates: Vec<Candidate>,
    pub intent: Intent,
    pub confidence: ConfidenceReport,
    pub rerank_changed_order: bool,
}

impl RetrievalOutcome {
    /// An empty outcome, as recorded for the `/smart` bypass.
    pub fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            intent: Intent::general(),
            confidence: ConfidenceReport {
                level: ConfidenceLevel::None,
                reasons: vec!["retrieval bypassed".to_string()],
            },
            rerank_changed_order: false,
        }
    }
}

/// RRF key: window ids and message ids live in separate key spaces;
/// question hits collapse onto their source message.
type FusionKey = (bool, i64);

fn fusion_key(candidate: &Candidate) -> FusionKey {
    (
        candidate.source == CandidateSource::ContextWindow,
        candidate.message_id,
    )
}

pub struct RetrievalEngine {
    searcher: HybridSearcher,
    embedder: Arc<dyn EmbeddingProvider>,
    expander: QueryExpander,
    classifier: IntentClassifier,
    reranker: Arc<dyn RerankProvider>,
    aliases: AliasService,
    policy: ConfidencePolicy,
}

impl RetrievalEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        searcher: HybridSearcher,
        embedder: Arc<dyn EmbeddingProvider>,
        expander: QueryExpander,
        classifier: IntentClassifier,
        reranker: Arc<dyn RerankProvider>,
        aliases: AliasService,
        policy: ConfidencePolicy,
    ) -> Self {
        Self {
            searcher,
            embedder,
            expander,
            classifier,
            reranker,
            aliases,
            policy,
        }
    }

    /// Run the full hybrid search.
    pub async fn search(&self, request: &SearchRequest) -> Result<RetrievalOutcome> {
        let intent = self
            .classifier
            .classify(
                &request.question,
                &request.asker_display_name,
                request.asker_username.as_deref(),
            )
            .await;

        let variants = self.expander.expand(&request.question).await;

        // One batched call for every variant.
        let vectors = match self.embedder.embed_batch(&variants).await {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!("Query embedding failed, lexical-only retrieval: {e}");
                vec![Vec::new(); variants.len()]
            }
        };

        // Personal strategy: resolve targets through the alias service.
        let authors = if intent.kind == IntentKind::Personal {
            let resolved = self.resolve_people(request.chat_id, &intent.people).await;
            if resolved.is_empty() {
                tracing::debug!("No personal target resolved, falling back to general search");
                None
            } else {
                Some(resolved)
            }
        } else {
            None
        };

        let mut rankings: Vec<Vec<FusionKey>> = Vec::new();
        let mut best: HashMap<FusionKey, Candidate> = HashMap::new();

        for (variant, vector) in variants.iter().zip(vectors.iter()) {
            let mut lists: Vec<Vec<Candidate>> = Vec::new();

            if !vector.is_empty() {
                match intent.kind {
                    IntentKind::Contextual => {
                        lists.push(
                            self.searcher
                                .search_contexts(request.chat_id, vector, VECTOR_TOP_K)
                                .await?,
                        );
                    }
                    _ => {
                        lists.push(
                            self.searcher
                                .search_messages(
                                    request.chat_id,
                                    vector,
                                    VECTOR_TOP_K,
                                    authors.as_deref(),
                                )
                                .await?,
                        );
                        // The Q→A bridge only helps untargeted search.
                        if authors.is_none() {
                            lists.push(
                                self.searcher
                                    .search_questions(request.chat_id, vector, VECTOR_TOP_K)
                                    .await?,
                            );
                        }
                    }
                }
            }

            lists.push(
                self.searcher
                    .search_lexical(request.chat_id, variant, LEXICAL_TOP_L, authors.as_deref())
                    .await?,
            );

            for list in lists {
                let mut ranking = Vec::with_capacity(list.len());
                for candidate in list {
                    let key = fusion_key(&candidate);
                    ranking.push(key);
                    match best.get_mut(&key) {
                        Some(existing) => {
                            existing.lexical |= candidate.lexical;
                            if candidate.score > existing.score {
                                let lexical = existing.lexical;
                                *existing = candidate;
                                existing.lexical = lexical;
                            }
                        }
                        None => {
                            best.insert(key, candidate);
                        }
                    }
                }
                if !ranking.is_empty() {
                    rankings.push(ranking);
                }
            }
        }

        let fused = rrf_merge(&rankings);
        let mut candidates: Vec<Candidate> = fused
            .into_iter()
            .filter_map(|(key, _)| best.remove(&key))
            .collect();

        let rerank_changed_order = self.rerank(&request.question, &mut candidates).await;

        let mut scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
        scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let has_lexical = candidates.iter().any(|c| c.lexical);
        let confidence = self.policy.evaluate(
            scores.first().copied(),
            scores.get(1).copied(),
            has_lexical,
            candidates.len(),
        );

        candidates.truncate(FINAL_TOP);

        tracing::debug!(
            chat_id = request.chat_id,
            candidates = candidates.len(),
            level = ?confidence.level,
            reasons = ?confidence.reasons,
            "Retrieval complete"
        );

        Ok(RetrievalOutcome {
            candidates,
            intent,
            confidence,
            rerank_changed_order,
        })
    }

    async fn resolve_people(&self, chat_id: i64, people: &[String]) -> Vec<i64> {
        let mut ids = Vec::new();
        for person in people {
            match self.aliases.resolve(chat_id, person).await {
                Ok(candidates) => {
                    for id in candidates {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
                Err(e) => tracing::warn!("Alias resolution for {person:?} failed: {e}"),
            }
        }
        ids
    }

    /// Rerank the top candidates in place. Returns whether the order
    /// changed; a failing provider leaves the fused order untouched.
    async fn rerank(&self, question: &str, candidates: &mut Vec<Candidate>) -> bool {
        if !self.reranker.enabled() || candidates.len() < 2 {
            return false;
        }

        let top = candidates.len().min(RERANK_TOP);
        let texts: Vec<String> = candidates[..top].iter().map(|c| c.text.clone()).collect();

        let scores = match self.reranker.rerank(question, &texts).await {
            Ok(scores) if scores.len() == top => scores,
            Ok(_) => {
                tracing::warn!("Reranker returned wrong score count, skipping rerank");
                return false;
            }
            Err(e) => {
                tracing::warn!("Rerank failed, keeping fused order: {e}");
                return false;
            }
        };

        let before: Vec<FusionKey> = candidates[..top].iter().map(fusion_key).collect();

        let mut scored: Vec<(Candidate, f32)> = candidates
            .drain(..top)
            .zip(scores.iter().copied())
            .filter(|(_, score)| *score >= RERANK_SCORE_FLOOR)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut reranked: Vec<Candidate> = scored.into_iter().map(|(c, _)| c).collect();
        let after: Vec<FusionKey> = reranked.iter().map(fusion_key).collect();
        reranked.extend(candidates.drain(..));
        *candidates = reranked;

        before != after
    }
}
