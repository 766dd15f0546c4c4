//! LLM provider registry, router and prompt catalogue

pub mod prompts;
pub mod provider;
pub mod router;

pub use prompts::PromptRegistry;
pub use provider::{ChatProvider, OpenAiProvider};
pub use router::LlmRouter;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Preferred provider tag ("factcheck", "uncensored", "web", ...)
    pub tag: Option<String>,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.7,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A completion plus usage metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub model: String,
    pub provider_name: String,
}

/// Parse a strictly-JSON LLM reply, tolerating markdown code fences.
///
/// Unparseable output is a data-validation error: callers log a warning
/// and drop the result instead of retrying.
pub fn parse_json_response<T: serde::de::DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_start())
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed);

    serde_json::from_str(stripped.trim())
        .map_err(|e| Error::InvalidData(format!("unparseable LLM JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        value: i32,
    }

    #[test]
    fn test_parse_plain_json() {
        let probe: Probe = parse_json_response(r#"{"value": 7}"#).unwrap();
        assert_eq!(probe, Probe { value: 7 });
    }

    #[test]
    fn test_parse_fenced_json() {
        let probe: Probe = parse_json_response("```json\n{\"value\": 7}\n```").unwrap();
        assert_eq!(probe, Probe { value: 7 });

        let probe: Probe = parse_json_response("```\n{\"value\": 3}\n```").unwrap();
        assert_eq!(probe, Probe { value: 3 });
    }

    #[test]
    fn test_parse_garbage_is_data_error() {
        let err = parse_json_response::<Probe>("definitely not json").unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
