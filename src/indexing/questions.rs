//! Hypothetical question generation handler
//!
//! The Q→A bridge: user queries look like questions while stored messages
//! look like answers, so for long original messages an LLM generates up to
//! K questions the message answers, and those get embedded and indexed.
//! Driven by its own low-priority queue. The LLM may return fewer
//! questions than asked for; downstream code never assumes a fixed count.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;

use super::{BatchOutcome, EmbeddingHandler, IndexStats, IndexingMetrics};
use crate::database::format_vector;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::llm::{parse_json_response, LlmRequest, LlmRouter, PromptRegistry};
use crate::queue::{QuestionGenTask, TypedQueue};
use crate::store::MessageStore;

#[derive(Debug, Deserialize)]
struct GeneratedQuestions {
    questions: Vec<String>,
}

pub struct QuestionGenerationHandler {
    pool: PgPool,
    store: MessageStore,
    queue: TypedQueue<QuestionGenTask>,
    embedder: Arc<dyn EmbeddingProvider>,
    router: Arc<LlmRouter>,
    prompts: Arc<PromptRegistry>,
    metrics: Arc<IndexingMetrics>,
    questions_per_message: usize,
}

impl QuestionGenerationHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        store: MessageStore,
        queue: TypedQueue<QuestionGenTask>,
        embedder: Arc<dyn EmbeddingProvider>,
        router: Arc<LlmRouter>,
        prompts: Arc<PromptRegistry>,
        metrics: Arc<IndexingMetrics>,
        questions_per_message: usize,
    ) -> Self {
        Self {
            pool,
            store,
            queue,
            embedder,
            router,
            prompts,
            metrics,
            questions_per_message,
        }
    }

    /// Generate, embed and store questions for one queued message.
    async fn process_task(&self, task: &QuestionGenTask) -> Result<usize> {
        let Some(message) = self.store.fetch_by_id(task.chat_id, task.message_id).await? else {
            // Message vanished; nothing to index.
            return Ok(0);
        };
        let text = message.text_or_empty();
        if text.trim().is_empty() {
            return Ok(0);
        }

        let system = self
            .prompts
            .resolve("questions", "default", "ru")
            .ok_or_else(|| Error::Configuration("questions prompt missing".into()))?
            .replace("{count}", &self.questions_per_message.to_string());

        let response = self
            .router
            .complete(&LlmRequest::new(system, text).with_temperature(0.5))
            .await?;

        let generated: GeneratedQuestions = match parse_json_response(&response.content) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(
                    chat_id = task.chat_id,
                    message_id = task.message_id,
                    "Dropping unparseable question reply: {e}"
                );
                return Ok(0);
            }
        };

        let questions: Vec<String> = generated
            .questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(self.questions_per_message)
            .collect();
        if questions.is_empty() {
            return Ok(0);
        }

        let vectors = self.embedder.embed_batch(&questions).await?;

        let mut stored = 0;
        for (index, (question, vector)) in questions.iter().zip(vectors.iter()).enumerate() {
            if vector.is_empty() {
                continue;
            }
            sqlx::query(
                "INSERT INTO question_embeddings
                     (chat_id, message_id, question_index, question_text, embedding)
                 VALUES ($1, $2, $3, $4, $5::vector)
                 ON CONFLICT (chat_id, message_id, question_index) DO NOTHING",
            )
            .bind(task.chat_id)
            .bind(task.message_id)
            .bind(index as i32)
            .bind(question)
            .bind(format_vector(vector))
            .execute(&self.pool)
            .await?;
            stored += 1;
        }

        Ok(stored)
    }
}

#[async_trait]
impl EmbeddingHandler for QuestionGenerationHandler {
    fn name(&self) -> &'static str {
        "question-embeddings"
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        let indexed = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT (chat_id, message_id)) FROM question_embeddings",
        )
        .fetch_one(&self.pool)
        .await?;
        let pending = self.queue.service().pending_count().await?;
        Ok(IndexStats {
            total: indexed + pending,
            indexed,
            pending,
        })
    }

    async fn process_batch(&self, batch_size: usize) -> Result<BatchOutcome> {
        let started = Instant::now();
        let mut processed = 0;

        for _ in 0..batch_size {
            let Some(item) = self.queue.pick().await? else {
                break;
            };

            match self.process_task(&item.payload).await {
                Ok(stored) => {
                    self.queue.complete(item.id, item.created_at).await?;
                    processed += 1;
                    if stored > 0 {
                        self.metrics.record_batch(stored);
                    }
                }
                Err(e) => {
                    // Rate limits bubble up so the orchestrator can pause;
                    // the row stays leased and recovers via the stale sweep.
                    if e.is_rate_limit() {
                        return Err(e);
                    }
                    self.metrics.record_failure();
                    self.queue.fail(item.id, item.attempt_count, &e.to_string()).await?;
                }
            }
        }

        Ok(BatchOutcome {
            processed,
            elapsed: started.elapsed(),
            has_more: processed == batch_size,
        })
    }
}
