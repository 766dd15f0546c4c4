//! Ban records with a fail-open TTL cache

use std::time::Duration;

use moka::sync::Cache;
use sqlx::PgPool;

use crate::error::Result;

const BAN_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct BanService {
    pool: PgPool,
    cache: Cache<(i64, i64), bool>,
}

impl BanService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(BAN_TTL)
                .build(),
        }
    }

    /// Whether the user is banned in this chat. Fails open: a store error
    /// reports "not banned" rather than taking the whole bot down.
    pub async fn is_banned(&self, chat_id: i64, user_id: i64) -> bool {
        let key = (chat_id, user_id);
        if let Some(banned) = self.cache.get(&key) {
            return banned;
        }

        let banned = match sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM banned_users WHERE chat_id = $1 AND user_id = $2)",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Ban lookup failed for {chat_id}/{user_id}: {e}");
                false
            }
        };

        self.cache.insert(key, banned);
        banned
    }

    pub async fn ban(&self, chat_id: i64, user_id: i64, reason: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO banned_users (chat_id, user_id, reason)
             VALUES ($1, $2, $3)
             ON CONFLICT (chat_id, user_id) DO UPDATE SET reason = EXCLUDED.reason",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        self.cache.insert((chat_id, user_id), true);
        Ok(())
    }

    pub async fn unban(&self, chat_id: i64, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM banned_users WHERE chat_id = $1 AND user_id = $2")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        self.cache.insert((chat_id, user_id), false);
        Ok(())
    }
}
