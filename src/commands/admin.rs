//! Admin command registry
//!
//! Capability interface per command: {keyword, execute(context)}. Concrete
//! commands are constructed once at startup and resolved by keyword. The
//! dispatcher already enforces the private-chat + configured-admin guard.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::database::Database;
use crate::error::Result;
use crate::indexing::{EmbeddingHandler, IndexingMetrics};
use crate::llm::{LlmRouter, PromptRegistry};
use crate::queue::QueueService;
use crate::store::chats::ChatRegistry;

/// Shared services available to admin commands.
pub struct AdminContext {
    pub db: Database,
    pub queues: Vec<QueueService>,
    pub handlers: Vec<Arc<dyn EmbeddingHandler>>,
    pub indexing_metrics: Arc<IndexingMetrics>,
    pub prompts: Arc<PromptRegistry>,
    pub router: Arc<LlmRouter>,
    pub chats: ChatRegistry,
}

#[async_trait]
pub trait AdminCommand: Send + Sync {
    fn keyword(&self) -> &'static str;

    fn description(&self) -> &'static str;

    async fn execute(&self, ctx: &AdminContext, args: &str) -> Result<String>;
}

/// Resolves admin commands by keyword.
pub struct AdminRegistry {
    ctx: Arc<AdminContext>,
    commands: HashMap<&'static str, Box<dyn AdminCommand>>,
}

impl AdminRegistry {
    pub fn new(ctx: AdminContext) -> Self {
        let mut registry = Self {
            ctx: Arc::new(ctx),
            commands: HashMap::new(),
        };
        registry.register(Box::new(StatusCommand));
        registry.register(Box::new(LlmCommand));
        registry.register(Box::new(PromptCommand));
        registry.register(Box::new(ReindexCommand));
        registry.register(Box::new(CleanupCommand));
        registry.register(Box::new(RenameCommand));
        registry
    }

    pub fn register(&mut self, command: Box<dyn AdminCommand>) {
        self.commands.insert(command.keyword(), command);
    }

    /// Execute by keyword. `None` means "not an admin command".
    pub async fn execute(&self, keyword: &str, args: &str) -> Option<String> {
        let command = self.commands.get(keyword)?;
        match command.execute(&self.ctx, args).await {
            Ok(reply) => Some(reply),
            Err(e) => Some(format!("Command failed: {e}")),
        }
    }
}

/// Service overview: DB health, queue dashboards, indexing coverage.
struct StatusCommand;

#[async_trait]
impl AdminCommand for StatusCommand {
    fn keyword(&self) -> &'static str {
        "status"
    }

    fn description(&self) -> &'static str {
        "database, queue and indexing status"
    }

    async fn execute(&self, ctx: &AdminContext, _args: &str) -> Result<String> {
        let mut lines = Vec::new();

        let health = ctx.db.health_check().await?;
        lines.push(format!(
            "db: {}",
            if health.is_healthy { "ok" } else { &health.message }
        ));

        for queue in &ctx.queues {
            let stats = queue.dashboard_stats().await?;
            lines.push(format!(
                "{}: ready={} scheduled={} in_flight={} done={} dead={} \
                 wait={:.0}ms proc={:.0}ms",
                stats.queue,
                stats.ready,
                stats.scheduled,
                stats.in_flight,
                stats.completed,
                stats.dead,
                stats.avg_wait_ms,
                stats.avg_processing_ms,
            ));
        }

        for handler in &ctx.handlers {
            match handler.get_stats().await {
                Ok(stats) => lines.push(format!(
                    "{}: {}/{} indexed, {} pending",
                    handler.name(),
                    stats.indexed,
                    stats.total,
                    stats.pending
                )),
                Err(e) => lines.push(format!("{}: stats unavailable ({e})", handler.name())),
            }
        }

        let (batches, items, failures, pauses) = ctx.indexing_metrics.snapshot();
        lines.push(format!(
            "indexing: {batches} batches, {items} items, {failures} failures, {pauses} rate-limit pauses"
        ));

        Ok(lines.join("\n"))
    }
}

/// Lists registered LLM providers in routing order.
struct LlmCommand;

#[async_trait]
impl AdminCommand for LlmCommand {
    fn keyword(&self) -> &'static str {
        "llm"
    }

    fn description(&self) -> &'static str {
        "list LLM providers"
    }

    async fn execute(&self, ctx: &AdminContext, _args: &str) -> Result<String> {
        Ok(format!("providers: {}", ctx.router.provider_names().join(", ")))
    }
}

/// `prompt <key> <text>` stores a runtime prompt override.
struct PromptCommand;

#[async_trait]
impl AdminCommand for PromptCommand {
    fn keyword(&self) -> &'static str {
        "prompt"
    }

    fn description(&self) -> &'static str {
        "override a prompt: prompt <key> <text>"
    }

    async fn execute(&self, ctx: &AdminContext, args: &str) -> Result<String> {
        let Some((key, text)) = args.trim().split_once(char::is_whitespace) else {
            return Ok("usage: prompt <key> <text>".to_string());
        };
        ctx.prompts
            .store_override(ctx.db.pool(), key, text.trim())
            .await?;
        Ok(format!("prompt {key} updated"))
    }
}

/// `reindex <chat_id>` drops stored embeddings so the pipeline rebuilds
/// them on its next pass.
struct ReindexCommand;

#[async_trait]
impl AdminCommand for ReindexCommand {
    fn keyword(&self) -> &'static str {
        "reindex"
    }

    fn description(&self) -> &'static str {
        "drop embeddings for a chat: reindex <chat_id>"
    }

    async fn execute(&self, ctx: &AdminContext, args: &str) -> Result<String> {
        let Ok(chat_id) = args.trim().parse::<i64>() else {
            return Ok("usage: reindex <chat_id>".to_string());
        };

        let mut dropped = 0u64;
        for table in ["message_embeddings", "context_embeddings", "question_embeddings"] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE chat_id = $1"))
                .bind(chat_id)
                .execute(ctx.db.pool())
                .await?;
            dropped += result.rows_affected();
        }

        Ok(format!("dropped {dropped} embeddings for chat {chat_id}; reindex will follow"))
    }
}

/// Runs retention cleanup on every queue immediately.
struct CleanupCommand;

#[async_trait]
impl AdminCommand for CleanupCommand {
    fn keyword(&self) -> &'static str {
        "cleanup"
    }

    fn description(&self) -> &'static str {
        "remove old processed queue rows now"
    }

    async fn execute(&self, ctx: &AdminContext, _args: &str) -> Result<String> {
        let mut removed = 0u64;
        for queue in &ctx.queues {
            removed += queue.cleanup().await?;
        }
        Ok(format!("removed {removed} processed queue rows"))
    }
}

/// `rename <chat_id> <title>` updates the stored chat title snapshot;
/// also re-activates a deactivated chat.
struct RenameCommand;

#[async_trait]
impl AdminCommand for RenameCommand {
    fn keyword(&self) -> &'static str {
        "rename"
    }

    fn description(&self) -> &'static str {
        "rename a chat: rename <chat_id> <title>"
    }

    async fn execute(&self, ctx: &AdminContext, args: &str) -> Result<String> {
        let Some((id, title)) = args.trim().split_once(char::is_whitespace) else {
            return Ok("usage: rename <chat_id> <title>".to_string());
        };
        let Ok(chat_id) = id.parse::<i64>() else {
            return Ok("usage: rename <chat_id> <title>".to_string());
        };

        sqlx::query("UPDATE chats SET title = $2, updated_at = now() WHERE chat_id = $1")
            .bind(chat_id)
            .bind(title.trim())
            .execute(ctx.db.pool())
            .await?;
        ctx.chats.reactivate(chat_id).await?;

        Ok(format!("chat {chat_id} renamed"))
    }
}
