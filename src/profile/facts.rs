//! LLM-driven fact extraction
//!
//! The fact worker drains the message queue in batches, groups entries by
//! (chat, user), asks the LLM for strictly-JSON facts and merges them with
//! a max-confidence upsert. Unparseable output is logged and dropped; the
//! messages themselves are already persisted so nothing is lost.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::llm::{parse_json_response, LlmRequest, LlmRouter, PromptRegistry};
use crate::store::MessageStore;

const ALLOWED_FACT_TYPES: &[&str] = &["likes", "dislikes", "said", "does", "knows", "opinion"];

/// A stored fact, as consumed by the memory context builder.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserFact {
    pub fact_text: String,
    pub fact_type: String,
    pub confidence: f32,
}

#[derive(Debug, Deserialize)]
struct ExtractedFacts {
    facts: Vec<ExtractedFact>,
}

#[derive(Debug, Deserialize)]
struct ExtractedFact {
    text: String,
    #[serde(rename = "type")]
    fact_type: String,
    confidence: f32,
}

#[derive(Clone)]
pub struct FactService {
    pool: PgPool,
}

impl FactService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Max-confidence upsert; source message ids accumulate without
    /// duplicates.
    pub async fn upsert(
        &self,
        chat_id: i64,
        user_id: i64,
        fact_text: &str,
        fact_type: &str,
        confidence: f32,
        source_message_ids: &[i64],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_facts
                 (chat_id, user_id, fact_text, fact_type, confidence, source_message_ids)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (chat_id, user_id, fact_text) DO UPDATE
             SET confidence = GREATEST(user_facts.confidence, EXCLUDED.confidence),
                 fact_type = EXCLUDED.fact_type,
                 updated_at = now(),
                 source_message_ids = (
                     SELECT ARRAY(
                         SELECT DISTINCT unnest(
                             array_cat(user_facts.source_message_ids, EXCLUDED.source_message_ids)
                         )
                     )
                 )",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(fact_text)
        .bind(fact_type)
        .bind(confidence)
        .bind(source_message_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Highest-confidence facts for one user.
    pub async fn top_facts(&self, chat_id: i64, user_id: i64, limit: i64) -> Result<Vec<UserFact>> {
        let rows = sqlx::query_as::<_, UserFact>(
            "SELECT fact_text, fact_type, confidence FROM user_facts
             WHERE chat_id = $1 AND user_id = $2
             ORDER BY confidence DESC, updated_at DESC
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

/// Extracts facts for one (chat, user) group of messages.
pub struct FactExtractor {
    facts: FactService,
    store: MessageStore,
    router: Arc<LlmRouter>,
    prompts: Arc<PromptRegistry>,
    request_delay: Duration,
}

impl FactExtractor {
    pub fn new(
        facts: FactService,
        store: MessageStore,
        router: Arc<LlmRouter>,
        prompts: Arc<PromptRegistry>,
        request_delay: Duration,
    ) -> Self {
        Self {
            facts,
            store,
            router,
            prompts,
            request_delay,
        }
    }

    /// Extract and store facts from one user's queued messages. Returns
    /// the number of facts written.
    pub async fn extract_for_user(
        &self,
        chat_id: i64,
        user_id: i64,
        message_ids: &[i64],
    ) -> Result<usize> {
        let messages = self.store.fetch_by_ids(chat_id, message_ids).await?;
        let texts: Vec<&str> = messages
            .iter()
            .filter_map(|m| m.text.as_deref())
            .filter(|t| !t.trim().is_empty())
            .collect();
        if texts.is_empty() {
            return Ok(0);
        }

        let system = self
            .prompts
            .resolve("facts", "default", "ru")
            .ok_or_else(|| Error::Configuration("facts prompt missing".into()))?;
        let request =
            LlmRequest::new(system, texts.join("\n")).with_temperature(0.2);

        let response = self.router.complete(&request).await?;

        let extracted: ExtractedFacts = match parse_json_response(&response.content) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(chat_id, user_id, "Dropping unparseable facts reply: {e}");
                return Ok(0);
            }
        };

        let mut written = 0;
        for fact in extracted.facts {
            let fact_type = fact.fact_type.to_lowercase();
            if !ALLOWED_FACT_TYPES.contains(&fact_type.as_str()) {
                tracing::warn!("Skipping fact with unknown type {:?}", fact.fact_type);
                continue;
            }
            let text = fact.text.trim();
            if text.is_empty() {
                continue;
            }
            self.facts
                .upsert(
                    chat_id,
                    user_id,
                    text,
                    &fact_type,
                    fact.confidence.clamp(0.0, 1.0),
                    message_ids,
                )
                .await?;
            written += 1;
        }

        // Yield to other producers between LLM calls.
        tokio::time::sleep(self.request_delay).await;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracted_facts_parse() {
        let raw = r#"{"facts": [{"text": "пишет на Rust", "type": "does", "confidence": 0.8}]}"#;
        let parsed: ExtractedFacts = parse_json_response(raw).unwrap();
        assert_eq!(parsed.facts.len(), 1);
        assert_eq!(parsed.facts[0].fact_type, "does");
    }

    #[test]
    fn test_fact_type_allow_list() {
        assert!(ALLOWED_FACT_TYPES.contains(&"likes"));
        assert!(!ALLOWED_FACT_TYPES.contains(&"secret"));
    }
}
