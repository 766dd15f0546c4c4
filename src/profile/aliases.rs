//! Per-user aliases (display names and nicknames)
//!
//! Upserts bump the usage counter; lookups are case-insensitive and
//! usage-ranked so the most common spelling wins ties.

use sqlx::PgPool;

use crate::error::Result;

#[derive(Clone)]
pub struct AliasService {
    pool: PgPool,
}

impl AliasService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record one sighting of an alias.
    pub async fn record(
        &self,
        chat_id: i64,
        user_id: i64,
        alias: &str,
        alias_type: &str,
    ) -> Result<()> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO user_aliases (chat_id, user_id, alias, alias_type)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (chat_id, user_id, alias) DO UPDATE
             SET usage_count = user_aliases.usage_count + 1,
                 last_seen = now()",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(alias)
        .bind(alias_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Candidate user ids for a name, most-used alias first.
    pub async fn resolve(&self, chat_id: i64, name: &str) -> Result<Vec<i64>> {
        let needle = name.trim().trim_start_matches('@');
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM user_aliases
             WHERE chat_id = $1 AND lower(alias) = lower($2)
             GROUP BY user_id
             ORDER BY SUM(usage_count) DESC",
        )
        .bind(chat_id)
        .bind(needle)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Most used alias for a user, if any.
    pub async fn primary_alias(&self, chat_id: i64, user_id: i64) -> Result<Option<String>> {
        let alias = sqlx::query_scalar::<_, String>(
            "SELECT alias FROM user_aliases
             WHERE chat_id = $1 AND user_id = $2
             ORDER BY usage_count DESC, last_seen DESC
             LIMIT 1",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(alias)
    }
}
