//! Per-message embedding handler
//!
//! Finds messages without a primary chunk via the store's gap scan, embeds
//! them in one provider call and upserts keyed on (chat, message, chunk).
//! Re-running over already-indexed rows is a no-op.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{BatchOutcome, EmbeddingHandler, IndexStats, IndexingMetrics};
use crate::database::format_vector;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::store::MessageStore;

pub struct MessageEmbeddingHandler {
    pool: PgPool,
    store: MessageStore,
    embedder: Arc<dyn EmbeddingProvider>,
    metrics: Arc<IndexingMetrics>,
    min_length: i64,
}

impl MessageEmbeddingHandler {
    pub fn new(
        pool: PgPool,
        store: MessageStore,
        embedder: Arc<dyn EmbeddingProvider>,
        metrics: Arc<IndexingMetrics>,
        min_length: usize,
    ) -> Self {
        Self {
            pool,
            store,
            embedder,
            metrics,
            min_length: min_length as i64,
        }
    }
}

#[async_trait]
impl EmbeddingHandler for MessageEmbeddingHandler {
    fn name(&self) -> &'static str {
        "message-embeddings"
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        let (total, indexed) = self.store.embedding_progress(self.min_length).await?;
        Ok(IndexStats {
            total,
            indexed,
            pending: (total - indexed).max(0),
        })
    }

    async fn process_batch(&self, batch_size: usize) -> Result<BatchOutcome> {
        let started = Instant::now();
        let messages = self
            .store
            .fetch_unembedded(self.min_length, batch_size as i64)
            .await?;

        if messages.is_empty() {
            return Ok(BatchOutcome {
                processed: 0,
                elapsed: started.elapsed(),
                has_more: false,
            });
        }

        let texts: Vec<String> = messages
            .iter()
            .map(|m| m.text_or_empty().to_string())
            .collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let mut processed = 0;
        for (message, vector) in messages.iter().zip(vectors.iter()) {
            if vector.is_empty() {
                // Provider skipped this input; do not store.
                continue;
            }

            let metadata = serde_json::json!({
                "author": message.author_label(),
                "sent_at": message.sent_at,
            });

            sqlx::query(
                "INSERT INTO message_embeddings
                     (chat_id, message_id, chunk_index, chunk_text, embedding, metadata)
                 VALUES ($1, $2, 0, $3, $4::vector, $5)
                 ON CONFLICT (chat_id, message_id, chunk_index) DO NOTHING",
            )
            .bind(message.chat_id)
            .bind(message.message_id)
            .bind(message.text_or_empty())
            .bind(format_vector(vector))
            .bind(metadata)
            .execute(&self.pool)
            .await?;

            processed += 1;
        }

        self.metrics.record_batch(processed);

        Ok(BatchOutcome {
            processed,
            elapsed: started.elapsed(),
            has_more: messages.len() == batch_size,
        })
    }
}
