//! Chat registry with a TTL activation cache
//!
//! Chats are created lazily on first message and deactivated when the
//! transport reports the chat permanently unreachable. The activation
//! cache fails open on store errors so a database hiccup never blocks
//! the whole ingestion path.

use std::time::Duration;

use moka::sync::Cache;
use sqlx::PgPool;

use crate::error::Result;

const ACTIVATION_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct ChatRegistry {
    pool: PgPool,
    active_cache: Cache<i64, bool>,
}

impl ChatRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            active_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ACTIVATION_TTL)
                .build(),
        }
    }

    /// Lazy upsert on first observed message; refreshes the title snapshot.
    pub async fn upsert(&self, chat_id: i64, title: Option<&str>, chat_type: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO chats (chat_id, title, chat_type)
             VALUES ($1, $2, $3)
             ON CONFLICT (chat_id) DO UPDATE
             SET title = COALESCE(EXCLUDED.title, chats.title),
                 updated_at = now()",
        )
        .bind(chat_id)
        .bind(title)
        .bind(chat_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether the chat is active. Fails open: store errors count as active.
    pub async fn is_active(&self, chat_id: i64) -> bool {
        if let Some(active) = self.active_cache.get(&chat_id) {
            return active;
        }

        let active = match sqlx::query_scalar::<_, bool>(
            "SELECT is_active FROM chats WHERE chat_id = $1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row.unwrap_or(true),
            Err(e) => {
                tracing::warn!("Chat activation lookup failed for {chat_id}: {e}");
                true
            }
        };

        self.active_cache.insert(chat_id, active);
        active
    }

    /// Deactivate after a permanent "chat unreachable" from the transport.
    pub async fn deactivate(&self, chat_id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE chats
             SET is_active = FALSE, deactivated_reason = $2, deactivated_at = now(),
                 updated_at = now()
             WHERE chat_id = $1",
        )
        .bind(chat_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        self.active_cache.insert(chat_id, false);
        tracing::info!("Chat {chat_id} deactivated: {reason}");
        Ok(())
    }

    /// Administrative re-activation.
    pub async fn reactivate(&self, chat_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE chats
             SET is_active = TRUE, deactivated_reason = NULL, deactivated_at = NULL,
                 updated_at = now()
             WHERE chat_id = $1",
        )
        .bind(chat_id)
        .execute(&self.pool)
        .await?;

        self.active_cache.insert(chat_id, true);
        Ok(())
    }

    /// Per-chat mode/language overrides for prompt selection.
    pub async fn settings(&self, chat_id: i64) -> Result<(Option<String>, Option<String>)> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            "SELECT mode, language FROM chat_settings WHERE chat_id = $1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.unwrap_or((None, None)))
    }

    /// All active chat ids, for schedulers and the context indexer.
    pub async fn active_chats(&self) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT chat_id FROM chats WHERE is_active = TRUE ORDER BY chat_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
