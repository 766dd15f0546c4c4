//! OpenAI-compatible chat completion provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{LlmRequest, LlmResponse};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};

/// A chat completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    fn tags(&self) -> &[String];

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Provider speaking the OpenAI `/v1/chat/completions` dialect.
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: crate::http_client::llm_client(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn priority(&self) -> i32 {
        self.config.priority
    }

    fn tags(&self) -> &[String] {
        &self.config.tags
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(Message {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(Message {
            role: "user",
            content: &request.user,
        });

        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: request.temperature,
            stream: false,
        };

        let mut builder = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&body);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => Error::RateLimited(format!("{}: {text}", self.config.name)),
                code => Error::Provider(format!("{} returned {code}: {text}", self.config.name)),
            });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                Error::InvalidData(format!("{} returned no choices", self.config.name))
            })?;

        let usage = parsed.usage.unwrap_or_default();

        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            model: parsed.model,
            provider_name: self.config.name.clone(),
        })
    }
}
