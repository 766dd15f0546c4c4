//! Confidence gate and answer generation
//!
//! The gate runs before any LLM money is spent: no retrieved evidence
//! suppresses the call entirely and sends a "not found" reply; weak
//! evidence proceeds with a warning. `/smart` bypasses retrieval: the
//! recorded outcome is empty and the gate reports None, but the generator
//! must not warn about it.

use std::sync::Arc;

use super::confidence::ConfidenceLevel;
use super::html::sanitise;
use super::RetrievalOutcome;
use crate::error::Result;
use crate::llm::{LlmRequest, LlmResponse, LlmRouter, PromptRegistry};
use crate::profile::MemoryService;

/// What the gate decided about the LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No evidence: send "not found", skip the LLM entirely
    Suppress,
    /// Weak evidence: call the LLM, prefix a warning
    ProceedWithWarning,
    Proceed,
}

/// Decide how to treat a request given its retrieval outcome.
pub fn evaluate_gate(command: &str, outcome: &RetrievalOutcome) -> GateDecision {
    // /smart deliberately records empty retrieval; never suppress or warn.
    if command == "smart" {
        return GateDecision::Proceed;
    }
    if outcome.candidates.is_empty() {
        return GateDecision::Suppress;
    }
    if outcome.confidence.level <= ConfidenceLevel::Low {
        return GateDecision::ProceedWithWarning;
    }
    GateDecision::Proceed
}

pub const NOT_FOUND_REPLY: &str =
    "Ничего не нашёл по этому вопросу в истории чата 🤷";

const LOW_CONFIDENCE_WARNING: &str =
    "⚠️ Уверенность в ответе низкая, могу ошибаться.\n\n";

/// One answer request as seen by the generator.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub chat_id: i64,
    pub user_id: i64,
    pub display_name: String,
    pub username: Option<String>,
    pub question: String,
    /// "ask", "smart", "summary", "truth"
    pub command: String,
    pub mode: String,
    pub language: String,
}

pub struct AnswerGenerator {
    router: Arc<LlmRouter>,
    prompts: Arc<PromptRegistry>,
    memory: MemoryService,
}

impl AnswerGenerator {
    pub fn new(
        router: Arc<LlmRouter>,
        prompts: Arc<PromptRegistry>,
        memory: MemoryService,
    ) -> Self {
        Self {
            router,
            prompts,
            memory,
        }
    }

    /// Generate the final user-visible reply. This is the one step whose
    /// failure aborts the request; everything feeding it degrades softly.
    pub async fn answer(
        &self,
        request: &AnswerRequest,
        outcome: &RetrievalOutcome,
        context_block: &str,
    ) -> Result<String> {
        match evaluate_gate(&request.command, outcome) {
            GateDecision::Suppress => return Ok(NOT_FOUND_REPLY.to_string()),
            GateDecision::ProceedWithWarning | GateDecision::Proceed => {}
        }

        let system = self
            .prompts
            .resolve(&request.command, &request.mode, &request.language)
            .unwrap_or_else(|| "Answer the user's question.".to_string());

        // Memory failure degrades to answering without memory.
        let memory_fragment = match self
            .memory
            .compose(request.chat_id, request.user_id, &request.question)
            .await
        {
            Ok(fragment) => fragment,
            Err(e) => {
                tracing::warn!("Memory context failed, answering without it: {e}");
                String::new()
            }
        };

        let user_prompt = compose_user_prompt(request, &memory_fragment, context_block);

        let mut llm_request = LlmRequest::new(system, user_prompt);
        match request.command.as_str() {
            "smart" => llm_request = llm_request.with_tag("web"),
            "truth" => llm_request = llm_request.with_tag("factcheck"),
            _ => {}
        }

        let response: LlmResponse = self.router.complete(&llm_request).await?;

        let mut reply = sanitise(response.content.trim());
        if evaluate_gate(&request.command, outcome) == GateDecision::ProceedWithWarning {
            reply = format!("{LOW_CONFIDENCE_WARNING}{reply}");
        }

        if let Err(e) = self
            .memory
            .record_interaction(request.chat_id, request.user_id, &request.question, &reply)
            .await
        {
            tracing::warn!("Failed to record interaction: {e}");
        }

        Ok(reply)
    }
}

fn compose_user_prompt(
    request: &AnswerRequest,
    memory_fragment: &str,
    context_block: &str,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    let asker = match request.username.as_deref() {
        Some(username) => format!("{} (@{username})", request.display_name),
        None => request.display_name.clone(),
    };
    sections.push(format!("Asker: {asker}"));

    if !memory_fragment.is_empty() {
        sections.push(format!("Memory:\n{memory_fragment}"));
    }
    if !context_block.is_empty() {
        sections.push(format!("Chat context:\n{context_block}"));
    }

    sections.push(format!("Question: {}", request.question));
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::search::{Candidate, CandidateSource};
    use crate::retrieval::{ConfidenceLevel, ConfidenceReport, Intent};

    fn outcome_with(level: ConfidenceLevel, candidates: usize) -> RetrievalOutcome {
        RetrievalOutcome {
            candidates: (0..candidates)
                .map(|i| Candidate {
                    chat_id: -1,
                    message_id: i as i64,
                    text: format!("msg {i}"),
                    author: None,
                    author_user_id: None,
                    sent_at: None,
                    score: 0.8,
                    lexical: false,
                    source: CandidateSource::Message,
                })
                .collect(),
            intent: Intent::general(),
            confidence: ConfidenceReport {
                level,
                reasons: vec![],
            },
            rerank_changed_order: false,
        }
    }

    #[test]
    fn test_gate_suppresses_on_no_evidence() {
        let outcome = outcome_with(ConfidenceLevel::None, 0);
        assert_eq!(evaluate_gate("ask", &outcome), GateDecision::Suppress);
    }

    #[test]
    fn test_gate_warns_on_weak_evidence() {
        let outcome = outcome_with(ConfidenceLevel::Low, 3);
        assert_eq!(evaluate_gate("ask", &outcome), GateDecision::ProceedWithWarning);
        let outcome = outcome_with(ConfidenceLevel::None, 3);
        assert_eq!(evaluate_gate("ask", &outcome), GateDecision::ProceedWithWarning);
    }

    #[test]
    fn test_gate_proceeds_on_solid_evidence() {
        let outcome = outcome_with(ConfidenceLevel::High, 5);
        assert_eq!(evaluate_gate("ask", &outcome), GateDecision::Proceed);
        let outcome = outcome_with(ConfidenceLevel::Medium, 5);
        assert_eq!(evaluate_gate("ask", &outcome), GateDecision::Proceed);
    }

    #[test]
    fn test_smart_bypasses_gate_without_warning() {
        // The smart path records an empty outcome; the gate must neither
        // suppress nor warn.
        let outcome = RetrievalOutcome::empty();
        assert_eq!(evaluate_gate("smart", &outcome), GateDecision::Proceed);
    }

    #[test]
    fn test_not_found_reply_phrase() {
        assert!(NOT_FOUND_REPLY.contains("не нашёл"));
    }

    #[test]
    fn test_prompt_composition_order() {
        let request = AnswerRequest {
            chat_id: -1,
            user_id: 5,
            display_name: "Иван".into(),
            username: Some("ivan_dev".into()),
            question: "что обсуждали?".into(),
            command: "ask".into(),
            mode: "sarcastic".into(),
            language: "ru".into(),
        };
        let prompt = compose_user_prompt(&request, "facts here", "context here");
        assert!(prompt.starts_with("Asker: Иван (@ivan_dev)"));
        assert!(prompt.contains("Memory:\nfacts here"));
        assert!(prompt.contains("Chat context:\ncontext here"));
        assert!(prompt.ends_with("Question: что обсуждали?"));
    }
}
