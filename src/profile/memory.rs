//! Memory context for answer generation
//!
//! Composes a compact prompt fragment: profile summary, gender when
//! confident, facts filtered by keyword overlap with the question, recent
//! interactions and top relationships. Always terminated with an
//! instruction to use only what is relevant.

use sqlx::PgPool;

use super::facts::{FactService, UserFact};
use super::relationships::{RelationshipRow, RelationshipService};
use crate::error::Result;

const GENDER_CONFIDENCE_FLOOR: f32 = 0.7;
const FACT_CANDIDATES: i64 = 30;
const FACTS_IN_CONTEXT: usize = 8;
const INTERACTIONS_IN_CONTEXT: i64 = 3;
const RELATIONSHIPS_IN_CONTEXT: i64 = 5;

#[derive(Debug, Clone, sqlx::FromRow)]
struct ProfileSnapshot {
    display_name: Option<String>,
    summary: Option<String>,
    gender: Option<String>,
    gender_confidence: f32,
}

#[derive(Clone)]
pub struct MemoryService {
    pool: PgPool,
    facts: FactService,
    relationships: RelationshipService,
}

impl MemoryService {
    pub fn new(pool: PgPool, facts: FactService, relationships: RelationshipService) -> Self {
        Self {
            pool,
            facts,
            relationships,
        }
    }

    /// Record one answered question for later context.
    pub async fn record_interaction(
        &self,
        chat_id: i64,
        user_id: i64,
        question: &str,
        answer: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversation_memory (chat_id, user_id, question, answer)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(question)
        .bind(answer)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Compose the memory fragment for a question from `user_id`.
    pub async fn compose(&self, chat_id: i64, user_id: i64, question: &str) -> Result<String> {
        let profile = sqlx::query_as::<_, ProfileSnapshot>(
            "SELECT display_name, summary, gender, gender_confidence
             FROM user_profiles WHERE chat_id = $1 AND user_id = $2",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let facts = self.facts.top_facts(chat_id, user_id, FACT_CANDIDATES).await?;
        let relationships = self
            .relationships
            .top_relationships(chat_id, user_id, RELATIONSHIPS_IN_CONTEXT)
            .await?;
        let interactions = sqlx::query_as::<_, (String, String)>(
            "SELECT question, answer FROM conversation_memory
             WHERE chat_id = $1 AND user_id = $2
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(INTERACTIONS_IN_CONTEXT)
        .fetch_all(&self.pool)
        .await?;

        Ok(build_fragment(
            profile.as_ref(),
            &facts,
            &relationships,
            &interactions,
            question,
        ))
    }
}

/// Keyword-overlap filter: keep facts sharing at least one significant
/// word with the question.
fn filter_facts<'a>(facts: &'a [UserFact], question: &str) -> Vec<&'a UserFact> {
    let keywords: Vec<String> = question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(String::from)
        .collect();

    let mut selected: Vec<&UserFact> = facts
        .iter()
        .filter(|f| {
            let text = f.fact_text.to_lowercase();
            keywords.iter().any(|k| text.contains(k.as_str()))
        })
        .collect();

    // Top up with the strongest remaining facts when overlap is sparse.
    for fact in facts {
        if selected.len() >= FACTS_IN_CONTEXT {
            break;
        }
        if !selected.iter().any(|f| f.fact_text == fact.fact_text) {
            selected.push(fact);
        }
    }
    selected.truncate(FACTS_IN_CONTEXT);
    selected
}

fn build_fragment(
    profile: Option<&ProfileSnapshot>,
    facts: &[UserFact],
    relationships: &[RelationshipRow],
    interactions: &[(String, String)],
    question: &str,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(profile) = profile {
        if let Some(summary) = profile.summary.as_deref().filter(|s| !s.is_empty()) {
            let name = profile.display_name.as_deref().unwrap_or("asker");
            parts.push(format!("About {name}: {summary}"));
        }
        if profile.gender_confidence >= GENDER_CONFIDENCE_FLOOR {
            if let Some(gender) = profile.gender.as_deref() {
                parts.push(format!("Gender: {gender}"));
            }
        }
    }

    let selected = filter_facts(facts, question);
    if !selected.is_empty() {
        let lines: Vec<String> = selected
            .iter()
            .map(|f| format!("- [{}] {}", f.fact_type, f.fact_text))
            .collect();
        parts.push(format!("Known facts:\n{}", lines.join("\n")));
    }

    if !relationships.is_empty() {
        let lines: Vec<String> = relationships
            .iter()
            .map(|r| format!("- {} ({})", r.person_name, r.surface_label))
            .collect();
        parts.push(format!("Relationships:\n{}", lines.join("\n")));
    }

    if !interactions.is_empty() {
        let lines: Vec<String> = interactions
            .iter()
            .map(|(q, a)| format!("Q: {q}\nA: {a}"))
            .collect();
        parts.push(format!("Recent interactions:\n{}", lines.join("\n")));
    }

    if parts.is_empty() {
        return String::new();
    }

    parts.push("Use only the details above that are relevant to the question.".to_string());
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(text: &str, fact_type: &str, confidence: f32) -> UserFact {
        UserFact {
            fact_text: text.into(),
            fact_type: fact_type.into(),
            confidence,
        }
    }

    #[test]
    fn test_keyword_overlap_prefers_matching_facts() {
        let facts = vec![
            fact("любит готовить пасту", "likes", 0.9),
            fact("работает программистом", "does", 0.8),
        ];
        let selected = filter_facts(&facts, "кто тут умеет готовить?");
        assert_eq!(selected[0].fact_text, "любит готовить пасту");
    }

    #[test]
    fn test_fragment_always_ends_with_instruction() {
        let facts = vec![fact("пишет на Rust", "does", 0.9)];
        let fragment = build_fragment(None, &facts, &[], &[], "что известно?");
        assert!(fragment.ends_with("relevant to the question."));
    }

    #[test]
    fn test_empty_memory_is_empty_fragment() {
        let fragment = build_fragment(None, &[], &[], &[], "вопрос");
        assert!(fragment.is_empty());
    }

    #[test]
    fn test_low_confidence_gender_is_omitted() {
        let profile = ProfileSnapshot {
            display_name: Some("Саша".into()),
            summary: Some("активный участник".into()),
            gender: Some("male".into()),
            gender_confidence: 0.6,
        };
        let fragment = build_fragment(Some(&profile), &[], &[], &[], "вопрос");
        assert!(!fragment.contains("Gender"));

        let confident = ProfileSnapshot {
            gender_confidence: 0.9,
            ..profile
        };
        let fragment = build_fragment(Some(&confident), &[], &[], &[], "вопрос");
        assert!(fragment.contains("Gender: male"));
    }
}
