//! Query intent classification
//!
//! Primary path asks the LLM for strict JSON; on any failure it falls
//! back to the heuristic personal-target detector (`@name` mentions or
//! self-reference against the asker's own names).

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::llm::{parse_json_response, LlmRequest, LlmRouter, PromptRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Personal,
    Contextual,
    General,
}

#[derive(Debug, Clone)]
pub struct Intent {
    pub kind: IntentKind,
    pub people: Vec<String>,
    pub entities: Vec<String>,
    pub temporal: Option<String>,
    pub temporal_days: Option<i64>,
    pub confidence: f32,
}

impl Intent {
    pub fn general() -> Self {
        Self {
            kind: IntentKind::General,
            people: Vec::new(),
            entities: Vec::new(),
            temporal: None,
            temporal_days: None,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntentReply {
    intent: String,
    #[serde(default)]
    people: Vec<String>,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    temporal: Option<String>,
    #[serde(default)]
    temporal_days: Option<i64>,
    #[serde(default)]
    confidence: f32,
}

lazy_static! {
    static ref MENTION: Regex = Regex::new(r"@([A-Za-z0-9_]{3,32})").unwrap();
    static ref SELF_REFERENCE: Regex =
        Regex::new(r"(?i)\b(обо мне|про меня|я говорил|я писал|мои сообщения)\b").unwrap();
}

/// Heuristic personal-target detector.
///
/// Returns the targeted name when the question names someone with an
/// `@mention` or refers to the asker themselves.
pub fn detect_personal_target(
    question: &str,
    asker_display_name: &str,
    asker_username: Option<&str>,
) -> Option<String> {
    if let Some(caps) = MENTION.captures(question) {
        return Some(caps[1].to_string());
    }

    if SELF_REFERENCE.is_match(question) {
        return asker_username
            .map(String::from)
            .or_else(|| Some(asker_display_name.to_string()))
            .filter(|s| !s.is_empty());
    }

    // The asker's own name spelled out also targets them.
    let lowered = question.to_lowercase();
    if !asker_display_name.is_empty() && lowered.contains(&asker_display_name.to_lowercase()) {
        return Some(asker_display_name.to_string());
    }

    None
}

pub struct IntentClassifier {
    router: Arc<LlmRouter>,
    prompts: Arc<PromptRegistry>,
}

impl IntentClassifier {
    pub fn new(router: Arc<LlmRouter>, prompts: Arc<PromptRegistry>) -> Self {
        Self { router, prompts }
    }

    /// Classify a question. Never fails: LLM trouble degrades to the
    /// heuristic detector, then to General.
    pub async fn classify(
        &self,
        question: &str,
        asker_display_name: &str,
        asker_username: Option<&str>,
    ) -> Intent {
        match self.classify_llm(question).await {
            Some(intent) => intent,
            None => {
                if let Some(target) =
                    detect_personal_target(question, asker_display_name, asker_username)
                {
                    Intent {
                        kind: IntentKind::Personal,
                        people: vec![target],
                        confidence: 0.5,
                        ..Intent::general()
                    }
                } else {
                    Intent::general()
                }
            }
        }
    }

    async fn classify_llm(&self, question: &str) -> Option<Intent> {
        let system = self.prompts.resolve("intent", "default", "ru")?;
        let request = LlmRequest::new(system, question).with_temperature(0.0);

        let response = match self.router.complete(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Intent classification failed, using heuristics: {e}");
                return None;
            }
        };

        let reply: IntentReply = match parse_json_response(&response.content) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Intent reply unparseable, using heuristics: {e}");
                return None;
            }
        };

        let kind = match reply.intent.as_str() {
            "personal" => IntentKind::Personal,
            "contextual" => IntentKind::Contextual,
            "general" => IntentKind::General,
            other => {
                tracing::warn!("Unknown intent {other:?}, using heuristics");
                return None;
            }
        };

        Some(Intent {
            kind,
            people: reply.people,
            entities: reply.entities,
            temporal: reply.temporal,
            temporal_days: reply.temporal_days,
            confidence: reply.confidence.clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mention_targets_named_user() {
        assert_eq!(
            detect_personal_target("что @testuser говорил про Rust?", "Иван", None),
            Some("testuser".to_string())
        );
    }

    #[test]
    fn test_self_reference_targets_asker() {
        assert_eq!(
            detect_personal_target("что известно обо мне?", "Иван", Some("ivan_dev")),
            Some("ivan_dev".to_string())
        );
        assert_eq!(
            detect_personal_target("что тут писали про меня?", "Иван", None),
            Some("Иван".to_string())
        );
    }

    #[test]
    fn test_own_name_targets_asker() {
        assert_eq!(
            detect_personal_target("что иван сказал вчера?", "Иван", None),
            Some("Иван".to_string())
        );
    }

    #[test]
    fn test_plain_question_has_no_target() {
        assert_eq!(
            detect_personal_target("какие языки программирования обсуждали?", "Иван", None),
            None
        );
    }
}
