//! Summary queue worker
//!
//! Fetches the chat's messages over the requested window, hands them to
//! the LLM with the summary prompt and sends the sanitised result.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::llm::{LlmRequest, LlmRouter, PromptRegistry};
use crate::queue::{QueueItem, QueueWorker, SummaryTask};
use crate::retrieval::html::sanitise;
use crate::store::chats::ChatRegistry;
use crate::store::MessageStore;
use crate::transport::ChatTransport;

const MAX_MESSAGES: i64 = 500;
const EMPTY_REPLY: &str = "За этот период в чате тихо, суммировать нечего.";

pub struct SummaryWorker {
    store: MessageStore,
    chats: ChatRegistry,
    router: Arc<LlmRouter>,
    prompts: Arc<PromptRegistry>,
    transport: Arc<dyn ChatTransport>,
    default_mode: String,
    default_language: String,
}

impl SummaryWorker {
    pub fn new(
        store: MessageStore,
        chats: ChatRegistry,
        router: Arc<LlmRouter>,
        prompts: Arc<PromptRegistry>,
        transport: Arc<dyn ChatTransport>,
        default_mode: &str,
        default_language: &str,
    ) -> Self {
        Self {
            store,
            chats,
            router,
            prompts,
            transport,
            default_mode: default_mode.to_string(),
            default_language: default_language.to_string(),
        }
    }
}

#[async_trait]
impl QueueWorker<SummaryTask> for SummaryWorker {
    fn name(&self) -> &'static str {
        "summary"
    }

    async fn process(&self, item: &QueueItem<SummaryTask>) -> Result<()> {
        let task = &item.payload;

        let mut messages = self
            .store
            .recent_by_chat(task.chat_id, task.hours, MAX_MESSAGES)
            .await?;
        messages.reverse(); // oldest first for the prompt

        if messages.is_empty() {
            self.transport.send_message(task.chat_id, EMPTY_REPLY).await?;
            return Ok(());
        }

        let transcript: Vec<String> = messages
            .iter()
            .map(|m| format!("{}: {}", m.author_label(), m.text_or_empty()))
            .collect();

        let (mode, language) = self.chats.settings(task.chat_id).await?;
        let system = self
            .prompts
            .resolve(
                "summary",
                mode.as_deref().unwrap_or(&self.default_mode),
                language.as_deref().unwrap_or(&self.default_language),
            )
            .ok_or_else(|| Error::Configuration("summary prompt missing".into()))?;

        let response = self
            .router
            .complete(&LlmRequest::new(system, transcript.join("\n")))
            .await?;

        let reply = sanitise(response.content.trim());
        self.transport.send_message(task.chat_id, &reply).await?;

        tracing::info!(
            chat_id = task.chat_id,
            hours = task.hours,
            messages = messages.len(),
            "Summary delivered"
        );
        Ok(())
    }
}
