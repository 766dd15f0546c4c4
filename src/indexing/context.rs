//! Sliding-window context embedding handler
//!
//! Builds overlapping windows of N consecutive messages per chat (sorted
//! by timestamp), concatenates the texts with author prefixes and embeds
//! the window as one unit. Windows are keyed on the start message id;
//! only windows whose every member message exists get indexed, which
//! holds by construction since members come from one snapshot query.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{BatchOutcome, EmbeddingHandler, IndexStats, IndexingMetrics};
use crate::database::format_vector;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::store::{ChatMessage, MessageStore};
use crate::store::chats::ChatRegistry;

/// Messages scanned per chat per batch.
const SCAN_DEPTH: i64 = 300;

/// A candidate window before embedding.
#[derive(Debug)]
struct Window {
    chat_id: i64,
    start_message_id: i64,
    member_ids: Vec<i64>,
    text: String,
}

/// Overlapping windows with a half-window step.
fn build_windows(chat_id: i64, messages: &[ChatMessage], size: usize) -> Vec<Window> {
    if messages.len() < size {
        return Vec::new();
    }

    let step = (size / 2).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    while start + size <= messages.len() {
        let slice = &messages[start..start + size];
        let text = slice
            .iter()
            .map(|m| format!("{}: {}", m.author_label(), m.text_or_empty()))
            .collect::<Vec<_>>()
            .join("\n");
        windows.push(Window {
            chat_id,
            start_message_id: slice[0].message_id,
            member_ids: slice.iter().map(|m| m.message_id).collect(),
            text,
        });
        start += step;
    }
    windows
}

pub struct ContextEmbeddingHandler {
    pool: PgPool,
    store: MessageStore,
    chats: ChatRegistry,
    embedder: Arc<dyn EmbeddingProvider>,
    metrics: Arc<IndexingMetrics>,
    window_size: usize,
    last_pending: AtomicI64,
}

impl ContextEmbeddingHandler {
    pub fn new(
        pool: PgPool,
        store: MessageStore,
        chats: ChatRegistry,
        embedder: Arc<dyn EmbeddingProvider>,
        metrics: Arc<IndexingMetrics>,
        window_size: usize,
    ) -> Self {
        Self {
            pool,
            store,
            chats,
            embedder,
            metrics,
            window_size: window_size.max(2),
            last_pending: AtomicI64::new(0),
        }
    }

    /// Start ids already persisted for one chat.
    async fn existing_starts(&self, chat_id: i64, starts: &[i64]) -> Result<Vec<i64>> {
        if starts.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_scalar::<_, i64>(
            "SELECT start_message_id FROM context_embeddings
             WHERE chat_id = $1 AND start_message_id = ANY($2)",
        )
        .bind(chat_id)
        .bind(starts)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn persist(&self, window: &Window, vector: &[f32]) -> Result<()> {
        sqlx::query(
            "INSERT INTO context_embeddings
                 (chat_id, start_message_id, window_text, embedding, member_message_ids)
             VALUES ($1, $2, $3, $4::vector, $5)
             ON CONFLICT (chat_id, start_message_id) DO NOTHING",
        )
        .bind(window.chat_id)
        .bind(window.start_message_id)
        .bind(&window.text)
        .bind(format_vector(vector))
        .bind(&window.member_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EmbeddingHandler for ContextEmbeddingHandler {
    fn name(&self) -> &'static str {
        "context-embeddings"
    }

    async fn get_stats(&self) -> Result<IndexStats> {
        let indexed = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM context_embeddings")
            .fetch_one(&self.pool)
            .await?;
        let pending = self.last_pending.load(Ordering::Relaxed);
        Ok(IndexStats {
            total: indexed + pending,
            indexed,
            pending,
        })
    }

    async fn process_batch(&self, batch_size: usize) -> Result<BatchOutcome> {
        let started = Instant::now();
        let mut fresh: Vec<Window> = Vec::new();
        let mut discovered = 0i64;

        for chat_id in self.chats.active_chats().await? {
            let messages = self.store.latest_for_windows(chat_id, SCAN_DEPTH).await?;
            let windows = build_windows(chat_id, &messages, self.window_size);
            if windows.is_empty() {
                continue;
            }

            let starts: Vec<i64> = windows.iter().map(|w| w.start_message_id).collect();
            let existing = self.existing_starts(chat_id, &starts).await?;

            for window in windows {
                if existing.contains(&window.start_message_id) {
                    continue;
                }
                discovered += 1;
                if fresh.len() < batch_size {
                    fresh.push(window);
                }
            }
        }

        self.last_pending.store(discovered, Ordering::Relaxed);

        if fresh.is_empty() {
            return Ok(BatchOutcome {
                processed: 0,
                elapsed: started.elapsed(),
                has_more: false,
            });
        }

        let texts: Vec<String> = fresh.iter().map(|w| w.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let mut processed = 0;
        for (window, vector) in fresh.iter().zip(vectors.iter()) {
            if vector.is_empty() {
                continue;
            }
            self.persist(window, vector).await?;
            processed += 1;
        }

        self.metrics.record_batch(processed);

        Ok(BatchOutcome {
            processed,
            elapsed: started.elapsed(),
            has_more: discovered > fresh.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: i64, text: &str) -> ChatMessage {
        ChatMessage {
            chat_id: -100,
            message_id: id,
            thread_id: None,
            user_id: 1,
            username: Some("tester".into()),
            display_name: Some("Tester".into()),
            text: Some(text.into()),
            sent_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            has_links: false,
            has_media: false,
            reply_to_message_id: None,
            message_type: "text".into(),
        }
    }

    #[test]
    fn test_windows_overlap_with_half_step() {
        let messages: Vec<ChatMessage> =
            (1..=20).map(|i| message(i, &format!("msg {i}"))).collect();
        let windows = build_windows(-100, &messages, 10);

        // Starts at 1, 6, 11 (half-window step of 5)
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start_message_id, 1);
        assert_eq!(windows[1].start_message_id, 6);
        assert_eq!(windows[2].start_message_id, 11);
        assert_eq!(windows[0].member_ids.len(), 10);
    }

    #[test]
    fn test_too_few_messages_yield_no_windows() {
        let messages: Vec<ChatMessage> = (1..=5).map(|i| message(i, "short")).collect();
        assert!(build_windows(-100, &messages, 10).is_empty());
    }

    #[test]
    fn test_window_text_carries_authors() {
        let messages: Vec<ChatMessage> = (1..=10).map(|i| message(i, &format!("msg {i}"))).collect();
        let windows = build_windows(-100, &messages, 10);
        assert!(windows[0].text.starts_with("Tester: msg 1"));
        assert!(windows[0].text.contains("Tester: msg 10"));
    }
}
