//! Message persistence and bulk fetches
//!
//! Messages are written once on first observation and never mutated.
//! Identity is (chat_id, message_id); saves are idempotent upserts.

pub mod bans;
pub mod chats;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// A persisted chat message.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub thread_id: Option<i64>,
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub text: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub has_links: bool,
    pub has_media: bool,
    pub reply_to_message_id: Option<i64>,
    pub message_type: String,
}

impl ChatMessage {
    /// Text content, empty string when the message carried none.
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Author label for prompts and context chunks.
    pub fn author_label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("unknown")
    }
}

/// A message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub thread_id: Option<i64>,
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub text: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub has_links: bool,
    pub has_media: bool,
    pub reply_to_message_id: Option<i64>,
    pub message_type: String,
}

/// Message store over the shared pool.
#[derive(Clone)]
pub struct MessageStore {
    pool: PgPool,
}

impl MessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent save. Returns true when a row was actually inserted,
    /// false when (chat_id, message_id) already existed.
    pub async fn save(&self, msg: &NewMessage) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (
                chat_id, message_id, thread_id, user_id, username, display_name,
                text, sent_at, has_links, has_media, reply_to_message_id, message_type
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (chat_id, message_id) DO NOTHING
            "#,
        )
        .bind(msg.chat_id)
        .bind(msg.message_id)
        .bind(msg.thread_id)
        .bind(msg.user_id)
        .bind(&msg.username)
        .bind(&msg.display_name)
        .bind(&msg.text)
        .bind(msg.sent_at)
        .bind(msg.has_links)
        .bind(msg.has_media)
        .bind(msg.reply_to_message_id)
        .bind(&msg.message_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a single message by identity.
    pub async fn fetch_by_id(&self, chat_id: i64, message_id: i64) -> Result<Option<ChatMessage>> {
        let row = sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM messages WHERE chat_id = $1 AND message_id = $2",
        )
        .bind(chat_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Fetch several messages of one chat by id, ordered by timestamp.
    pub async fn fetch_by_ids(&self, chat_id: i64, ids: &[i64]) -> Result<Vec<ChatMessage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM messages
             WHERE chat_id = $1 AND message_id = ANY($2)
             ORDER BY sent_at ASC",
        )
        .bind(chat_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Messages of one chat within the last `hours`, newest first.
    pub async fn recent_by_chat(
        &self,
        chat_id: i64,
        hours: i64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let since = Utc::now() - Duration::hours(hours);
        let rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM messages
             WHERE chat_id = $1 AND sent_at >= $2 AND text IS NOT NULL
             ORDER BY sent_at DESC
             LIMIT $3",
        )
        .bind(chat_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Neighbouring messages around an anchor, for context expansion.
    pub async fn surrounding(
        &self,
        chat_id: i64,
        anchor_sent_at: DateTime<Utc>,
        before: i64,
        after: i64,
    ) -> Result<Vec<ChatMessage>> {
        let mut rows = sqlx::query_as::<_, ChatMessage>(
            "(SELECT * FROM messages
              WHERE chat_id = $1 AND sent_at < $2 AND text IS NOT NULL
              ORDER BY sent_at DESC LIMIT $3)
             UNION ALL
             (SELECT * FROM messages
              WHERE chat_id = $1 AND sent_at > $2 AND text IS NOT NULL
              ORDER BY sent_at ASC LIMIT $4)",
        )
        .bind(chat_id)
        .bind(anchor_sent_at)
        .bind(before)
        .bind(after)
        .fetch_all(&self.pool)
        .await?;

        rows.sort_by_key(|m| m.sent_at);
        Ok(rows)
    }

    /// Messages that still lack a primary embedding chunk.
    ///
    /// LEFT JOIN gap-finding rather than a cursor, so deleted or failed
    /// rows are always re-discovered.
    pub async fn fetch_unembedded(&self, min_length: i64, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT m.* FROM messages m
             LEFT JOIN message_embeddings e
               ON e.chat_id = m.chat_id AND e.message_id = m.message_id AND e.chunk_index = 0
             WHERE e.chat_id IS NULL
               AND m.text IS NOT NULL
               AND char_length(m.text) >= $1
             ORDER BY m.sent_at ASC
             LIMIT $2",
        )
        .bind(min_length)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Count of messages eligible for embedding and of already-indexed ones.
    pub async fn embedding_progress(&self, min_length: i64) -> Result<(i64, i64)> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages
             WHERE text IS NOT NULL AND char_length(text) >= $1",
        )
        .bind(min_length)
        .fetch_one(&self.pool)
        .await?;

        let indexed = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM message_embeddings WHERE chunk_index = 0",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((total, indexed))
    }

    /// Latest messages of a chat ordered oldest-first, for window building.
    pub async fn latest_for_windows(&self, chat_id: i64, limit: i64) -> Result<Vec<ChatMessage>> {
        let mut rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM messages
             WHERE chat_id = $1 AND text IS NOT NULL
             ORDER BY sent_at DESC
             LIMIT $2",
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.sort_by_key(|m| m.sent_at);
        Ok(rows)
    }

    /// Random sample of one user's messages, for profile generation.
    pub async fn random_sample_by_user(
        &self,
        chat_id: i64,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM messages
             WHERE chat_id = $1 AND user_id = $2 AND text IS NOT NULL
             ORDER BY random()
             LIMIT $3",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Per-user message counts for a chat over a recency window.
    pub async fn active_users(
        &self,
        chat_id: i64,
        since_days: i64,
        min_messages: i64,
    ) -> Result<Vec<(i64, i64)>> {
        let since = Utc::now() - Duration::days(since_days);
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT user_id, COUNT(*) FROM messages
             WHERE chat_id = $1 AND sent_at >= $2
             GROUP BY user_id
             HAVING COUNT(*) >= $3
             ORDER BY COUNT(*) DESC",
        )
        .bind(chat_id)
        .bind(since)
        .bind(min_messages)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
