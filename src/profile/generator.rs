//! Nightly profile generation
//!
//! For every active user (message threshold, recent activity) the
//! generator concatenates a random sample of their messages with their
//! top facts and asks the LLM for a structured profile blob. Each run
//! bumps `profile_version`; gender never downgrades in confidence.

use std::sync::Arc;

use serde::Deserialize;
use sqlx::PgPool;

use super::facts::FactService;
use super::gender;
use crate::error::{Error, Result};
use crate::llm::{parse_json_response, LlmRequest, LlmRouter, PromptRegistry};
use crate::store::MessageStore;

const SAMPLE_MESSAGES: i64 = 50;
const FACTS_FOR_PROFILE: i64 = 20;
const ACTIVITY_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
struct ProfileBlob {
    summary: String,
    #[serde(default)]
    communication_style: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    interests: Vec<String>,
    #[serde(default)]
    traits: Vec<String>,
    #[serde(default)]
    roast_material: Vec<String>,
}

pub struct ProfileGenerator {
    pool: PgPool,
    store: MessageStore,
    facts: FactService,
    router: Arc<LlmRouter>,
    prompts: Arc<PromptRegistry>,
    min_messages: i64,
}

impl ProfileGenerator {
    pub fn new(
        pool: PgPool,
        store: MessageStore,
        facts: FactService,
        router: Arc<LlmRouter>,
        prompts: Arc<PromptRegistry>,
        min_messages: i64,
    ) -> Self {
        Self {
            pool,
            store,
            facts,
            router,
            prompts,
            min_messages,
        }
    }

    /// Generate profiles for every qualifying user of one chat.
    /// Returns the number of profiles written.
    pub async fn generate_for_chat(&self, chat_id: i64) -> Result<usize> {
        let users = self
            .store
            .active_users(chat_id, ACTIVITY_WINDOW_DAYS, self.min_messages)
            .await?;

        let mut generated = 0;
        for (user_id, message_count) in users {
            match self.generate_for_user(chat_id, user_id, message_count).await {
                Ok(()) => generated += 1,
                Err(e) => {
                    tracing::warn!(chat_id, user_id, "Profile generation failed: {e}");
                }
            }
        }

        if generated > 0 {
            tracing::info!(chat_id, generated, "Profile generation pass complete");
        }
        Ok(generated)
    }

    async fn generate_for_user(&self, chat_id: i64, user_id: i64, message_count: i64) -> Result<()> {
        let sample = self
            .store
            .random_sample_by_user(chat_id, user_id, SAMPLE_MESSAGES)
            .await?;
        if sample.is_empty() {
            return Ok(());
        }

        let display_name = sample
            .iter()
            .find_map(|m| m.display_name.clone())
            .unwrap_or_default();

        let facts = self.facts.top_facts(chat_id, user_id, FACTS_FOR_PROFILE).await?;
        let fact_lines: Vec<String> = facts
            .iter()
            .map(|f| format!("- [{}] {}", f.fact_type, f.fact_text))
            .collect();
        let message_lines: Vec<&str> = sample
            .iter()
            .filter_map(|m| m.text.as_deref())
            .collect();

        let system = self
            .prompts
            .resolve("profile", "default", "ru")
            .ok_or_else(|| Error::Configuration("profile prompt missing".into()))?;
        let user_prompt = format!(
            "User: {display_name}\n\nKnown facts:\n{}\n\nMessage sample:\n{}",
            fact_lines.join("\n"),
            message_lines.join("\n")
        );

        let response = self
            .router
            .complete(&LlmRequest::new(system, user_prompt).with_temperature(0.4))
            .await?;

        let blob: ProfileBlob = match parse_json_response(&response.content) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(chat_id, user_id, "Dropping unparseable profile reply: {e}");
                return Ok(());
            }
        };

        // Hybrid gender detection over the same sample.
        let texts: Vec<String> = message_lines.iter().map(|s| s.to_string()).collect();
        let detected = gender::from_messages(&texts)
            .or_else(|| gender::from_name(&display_name));
        let (gender_value, gender_confidence) = match detected {
            Some((g, c)) => (Some(g.as_str()), c),
            None => (None, 0.0),
        };

        let activity = self.activity_histogram(chat_id, user_id).await?;

        sqlx::query(
            "INSERT INTO user_profiles
                 (chat_id, user_id, display_name, message_count, activity_hours, summary,
                  communication_style, role_label, interests, traits, roast_material,
                  gender, gender_confidence, profile_version, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 1, now())
             ON CONFLICT (chat_id, user_id) DO UPDATE
             SET display_name = EXCLUDED.display_name,
                 message_count = EXCLUDED.message_count,
                 activity_hours = EXCLUDED.activity_hours,
                 summary = EXCLUDED.summary,
                 communication_style = EXCLUDED.communication_style,
                 role_label = EXCLUDED.role_label,
                 interests = EXCLUDED.interests,
                 traits = EXCLUDED.traits,
                 roast_material = EXCLUDED.roast_material,
                 gender = CASE
                     WHEN EXCLUDED.gender_confidence > user_profiles.gender_confidence
                     THEN EXCLUDED.gender ELSE user_profiles.gender END,
                 gender_confidence = GREATEST(user_profiles.gender_confidence,
                                              EXCLUDED.gender_confidence),
                 profile_version = user_profiles.profile_version + 1,
                 updated_at = now()",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(&display_name)
        .bind(message_count)
        .bind(activity)
        .bind(&blob.summary)
        .bind(&blob.communication_style)
        .bind(&blob.role)
        .bind(serde_json::to_value(&blob.interests)?)
        .bind(serde_json::to_value(&blob.traits)?)
        .bind(serde_json::to_value(&blob.roast_material)?)
        .bind(gender_value)
        .bind(gender_confidence)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Message counts bucketed by UTC hour over the activity window.
    async fn activity_histogram(&self, chat_id: i64, user_id: i64) -> Result<serde_json::Value> {
        let rows = sqlx::query_as::<_, (i32, i64)>(
            "SELECT EXTRACT(HOUR FROM sent_at)::INT AS hour, COUNT(*) FROM messages
             WHERE chat_id = $1 AND user_id = $2
               AND sent_at >= now() - INTERVAL '30 days'
             GROUP BY 1",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut histogram = serde_json::Map::new();
        for (hour, count) in rows {
            histogram.insert(hour.to_string(), serde_json::json!(count));
        }
        Ok(serde_json::Value::Object(histogram))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_blob_tolerates_missing_fields() {
        let blob: ProfileBlob =
            parse_json_response(r#"{"summary": "пишет про Rust"}"#).unwrap();
        assert_eq!(blob.summary, "пишет про Rust");
        assert!(blob.interests.is_empty());
        assert!(blob.role.is_none());
    }
}
