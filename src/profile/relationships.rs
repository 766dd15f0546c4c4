//! Relationship graph persistence
//!
//! Relationships are rows keyed by (chat, user, person name, type), never
//! an in-memory graph; traversals are queries. Exclusive types (spouse,
//! partner) keep at most one active row per user: recording a mention of
//! a different person ends the previous one.

use sqlx::PgPool;

use crate::error::Result;
use crate::ingest::relationship::RelationshipMention;

/// A stored relationship row as used by prompts and the admin surface.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RelationshipRow {
    pub person_name: String,
    pub related_user_id: Option<i64>,
    pub relationship_type: String,
    pub surface_label: String,
    pub confidence: f32,
    pub mention_count: i32,
}

#[derive(Clone)]
pub struct RelationshipService {
    pool: PgPool,
}

impl RelationshipService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record one extracted mention.
    pub async fn record_mention(
        &self,
        chat_id: i64,
        user_id: i64,
        mention: &RelationshipMention,
        source_message_id: i64,
    ) -> Result<()> {
        if mention.exclusive {
            let ended = sqlx::query(
                "UPDATE user_relationships
                 SET is_active = FALSE, ended_at = now(),
                     ended_reason = 'superseded by ' || $4
                 WHERE chat_id = $1 AND user_id = $2 AND relationship_type = $3
                   AND is_active = TRUE AND person_name <> $4",
            )
            .bind(chat_id)
            .bind(user_id)
            .bind(mention.canonical_type)
            .bind(&mention.person_name)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if ended > 0 {
                tracing::info!(
                    chat_id,
                    user_id,
                    "Ended {ended} previous {} relationship(s), new person: {}",
                    mention.canonical_type,
                    mention.person_name
                );
            }
        }

        sqlx::query(
            "INSERT INTO user_relationships
                 (chat_id, user_id, person_name, relationship_type, surface_label,
                  confidence, source_message_ids)
             VALUES ($1, $2, $3, $4, $5, $6, ARRAY[$7]::BIGINT[])
             ON CONFLICT (chat_id, user_id, person_name, relationship_type) DO UPDATE
             SET mention_count = user_relationships.mention_count + 1,
                 confidence = GREATEST(user_relationships.confidence, EXCLUDED.confidence),
                 surface_label = EXCLUDED.surface_label,
                 last_seen = now(),
                 is_active = TRUE,
                 ended_at = NULL,
                 ended_reason = NULL,
                 source_message_ids = (
                     SELECT ARRAY(
                         SELECT DISTINCT unnest(
                             array_append(user_relationships.source_message_ids, $7)
                         )
                     )
                 )",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(&mention.person_name)
        .bind(mention.canonical_type)
        .bind(&mention.surface_label)
        .bind(mention.confidence)
        .bind(source_message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Link a mention's person name to a resolved user id.
    pub async fn link_person(
        &self,
        chat_id: i64,
        user_id: i64,
        person_name: &str,
        related_user_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_relationships
             SET related_user_id = $4
             WHERE chat_id = $1 AND user_id = $2 AND person_name = $3",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(person_name)
        .bind(related_user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Active relationships for one user, strongest first.
    pub async fn top_relationships(
        &self,
        chat_id: i64,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<RelationshipRow>> {
        let rows = sqlx::query_as::<_, RelationshipRow>(
            "SELECT person_name, related_user_id, relationship_type, surface_label,
                    confidence, mention_count
             FROM user_relationships
             WHERE chat_id = $1 AND user_id = $2 AND is_active = TRUE
             ORDER BY confidence DESC, mention_count DESC
             LIMIT $3",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
