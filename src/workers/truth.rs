//! Truth (fact-check) queue worker
//!
//! Takes the last N messages of the chat and asks a factcheck-tagged
//! provider to grade each claim.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::llm::{LlmRequest, LlmRouter, PromptRegistry};
use crate::queue::{QueueItem, QueueWorker, TruthTask};
use crate::retrieval::html::sanitise;
use crate::store::MessageStore;
use crate::transport::ChatTransport;

const EMPTY_REPLY: &str = "Нет недавних сообщений для проверки.";

pub struct TruthWorker {
    store: MessageStore,
    router: Arc<LlmRouter>,
    prompts: Arc<PromptRegistry>,
    transport: Arc<dyn ChatTransport>,
}

impl TruthWorker {
    pub fn new(
        store: MessageStore,
        router: Arc<LlmRouter>,
        prompts: Arc<PromptRegistry>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            store,
            router,
            prompts,
            transport,
        }
    }
}

#[async_trait]
impl QueueWorker<TruthTask> for TruthWorker {
    fn name(&self) -> &'static str {
        "truth"
    }

    async fn process(&self, item: &QueueItem<TruthTask>) -> Result<()> {
        let task = &item.payload;

        let messages = self
            .store
            .latest_for_windows(task.chat_id, task.message_count)
            .await?;
        if messages.is_empty() {
            self.transport.send_message(task.chat_id, EMPTY_REPLY).await?;
            return Ok(());
        }

        let numbered: Vec<String> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}: {}", i + 1, m.author_label(), m.text_or_empty()))
            .collect();

        let system = self
            .prompts
            .resolve("truth", "default", "ru")
            .ok_or_else(|| Error::Configuration("truth prompt missing".into()))?;

        let response = self
            .router
            .complete(&LlmRequest::new(system, numbered.join("\n")).with_tag("factcheck"))
            .await?;

        let reply = sanitise(response.content.trim());
        self.transport.send_message(task.chat_id, &reply).await?;
        Ok(())
    }
}
