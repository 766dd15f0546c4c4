//! Ask/smart queue worker
//!
//! Drains the ask queue: retrieval → context building → answer generation
//! → reply. `/smart` skips retrieval entirely and routes to a web-enabled
//! provider. A handler error fails the row for retry; on the final
//! attempt the user gets told to try again before the row dead-letters.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::queue::{AskTask, QueueItem, QueueWorker};
use crate::retrieval::{
    AnswerGenerator, AnswerRequest, ContextBuilder, RetrievalEngine, RetrievalOutcome,
    SearchRequest,
};
use crate::store::chats::ChatRegistry;
use crate::transport::ChatTransport;

const FINAL_FAILURE_REPLY: &str =
    "Не получилось ответить на вопрос, попробуйте ещё раз позже.";

pub struct AskWorker {
    engine: Arc<RetrievalEngine>,
    context_builder: Arc<ContextBuilder>,
    generator: Arc<AnswerGenerator>,
    transport: Arc<dyn ChatTransport>,
    chats: ChatRegistry,
    default_mode: String,
    default_language: String,
    max_attempts: i32,
}

impl AskWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<RetrievalEngine>,
        context_builder: Arc<ContextBuilder>,
        generator: Arc<AnswerGenerator>,
        transport: Arc<dyn ChatTransport>,
        chats: ChatRegistry,
        default_mode: &str,
        default_language: &str,
        max_attempts: i32,
    ) -> Self {
        Self {
            engine,
            context_builder,
            generator,
            transport,
            chats,
            default_mode: default_mode.to_string(),
            default_language: default_language.to_string(),
            max_attempts,
        }
    }

    async fn answer_task(&self, task: &AskTask) -> Result<String> {
        let (outcome, context_block) = if task.command == "smart" {
            // Bypass: recorded as empty retrieval; the gate knows.
            (RetrievalOutcome::empty(), String::new())
        } else {
            let outcome = self
                .engine
                .search(&SearchRequest {
                    chat_id: task.chat_id,
                    asker_user_id: task.user_id,
                    asker_display_name: task.display_name.clone(),
                    asker_username: task.username.clone(),
                    question: task.question.clone(),
                })
                .await?;
            let context_block = self
                .context_builder
                .build(task.chat_id, &outcome.candidates)
                .await?;
            (outcome, context_block)
        };

        let (mode, language) = self.chats.settings(task.chat_id).await?;
        let request = AnswerRequest {
            chat_id: task.chat_id,
            user_id: task.user_id,
            display_name: task.display_name.clone(),
            username: task.username.clone(),
            question: task.question.clone(),
            command: task.command.clone(),
            mode: mode.unwrap_or_else(|| self.default_mode.clone()),
            language: language.unwrap_or_else(|| self.default_language.clone()),
        };

        self.generator.answer(&request, &outcome, &context_block).await
    }
}

#[async_trait]
impl QueueWorker<AskTask> for AskWorker {
    fn name(&self) -> &'static str {
        "ask"
    }

    async fn process(&self, item: &QueueItem<AskTask>) -> Result<()> {
        let task = &item.payload;

        match self.answer_task(task).await {
            Ok(reply) => {
                self.transport.send_message(task.chat_id, &reply).await?;
                Ok(())
            }
            Err(e) => {
                if item.attempt_count >= self.max_attempts {
                    // Dead-letter incoming; tell the user before it does.
                    let _ = self
                        .transport
                        .send_message(task.chat_id, FINAL_FAILURE_REPLY)
                        .await;
                }
                Err(e)
            }
        }
    }
}
