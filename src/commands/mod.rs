//! Command parsing and dispatch
//!
//! Handlers parse arguments, validate cheaply, enqueue work with a
//! capacity guard and acknowledge immediately; all heavy processing
//! happens in the workers draining the queues.

pub mod admin;

pub use admin::{AdminCommand, AdminContext, AdminRegistry};

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::queue::{AskTask, SummaryTask, TruthTask, TypedQueue};
use crate::store::bans::BanService;
use crate::transport::ChatTransport;

/// Truth command bounds.
pub const TRUTH_DEFAULT: i64 = 5;
pub const TRUTH_MIN: i64 = 1;
pub const TRUTH_MAX: i64 = 15;

/// Summary command bounds.
pub const SUMMARY_DEFAULT_HOURS: i64 = 24;
pub const SUMMARY_MAX_HOURS: i64 = 168;

const ASK_HELP: &str = "Напиши вопрос после команды, например:\n\
                        /ask кто вчера обещал принести пиво?";

const TRY_AGAIN: &str = "Сейчас слишком много запросов, попробуйте ещё раз чуть позже.";

const START_GROUP_REPLY: &str = "Я тут. Индексирую чат и отвечаю на /ask.";

const START_PRIVATE_REPLY: &str =
    "Привет! Я анализирую групповые чаты: отвечаю на вопросы по истории \
     (/ask), делаю сводки (/summary) и проверяю факты (/truth).\n\
     Добавь меня в чат, чтобы начать.";

/// A parsed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: String,
    pub args: String,
}

/// Split `/cmd@botname args` into a command and its argument string.
pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }

    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let command = head.split('@').next().unwrap_or(head).to_lowercase();
    if command.is_empty() || !command.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    Some(ParsedCommand {
        command,
        args: args.to_string(),
    })
}

/// `/truth [count]`: default 5, clamped to [1, 15]; anything unparseable
/// falls back to the default.
pub fn parse_truth_count(args: &str) -> i64 {
    let args = args.trim();
    if args.is_empty() {
        return TRUTH_DEFAULT;
    }
    match args.parse::<i64>() {
        Ok(n) if n < TRUTH_MIN => TRUTH_DEFAULT,
        Ok(n) => n.min(TRUTH_MAX),
        Err(_) => TRUTH_DEFAULT,
    }
}

/// `/summary [hours]`: default 24, capped.
pub fn parse_summary_hours(args: &str) -> i64 {
    let args = args.trim();
    if args.is_empty() {
        return SUMMARY_DEFAULT_HOURS;
    }
    match args.parse::<i64>() {
        Ok(n) if n >= 1 => n.min(SUMMARY_MAX_HOURS),
        _ => SUMMARY_DEFAULT_HOURS,
    }
}

/// Context of one inbound command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub chat_id: i64,
    pub chat_type: String,
    pub user_id: i64,
    pub display_name: String,
    pub username: Option<String>,
    pub text: String,
}

impl CommandContext {
    pub fn is_private(&self) -> bool {
        self.chat_type == "private"
    }
}

pub struct CommandDispatcher {
    transport: Arc<dyn ChatTransport>,
    bans: BanService,
    ask_queue: TypedQueue<AskTask>,
    summary_queue: TypedQueue<SummaryTask>,
    truth_queue: TypedQueue<TruthTask>,
    admin: AdminRegistry,
    admin_user_id: i64,
    admin_username: String,
    bot_invite_url: String,
}

impl CommandDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        bans: BanService,
        ask_queue: TypedQueue<AskTask>,
        summary_queue: TypedQueue<SummaryTask>,
        truth_queue: TypedQueue<TruthTask>,
        admin: AdminRegistry,
        admin_user_id: i64,
        admin_username: &str,
        bot_invite_url: &str,
    ) -> Self {
        Self {
            transport,
            bans,
            ask_queue,
            summary_queue,
            truth_queue,
            admin,
            admin_user_id,
            admin_username: admin_username.to_string(),
            bot_invite_url: bot_invite_url.to_string(),
        }
    }

    fn is_admin(&self, ctx: &CommandContext) -> bool {
        if self.admin_user_id != 0 && ctx.user_id == self.admin_user_id {
            return true;
        }
        !self.admin_username.is_empty()
            && ctx.username.as_deref() == Some(self.admin_username.as_str())
    }

    /// Dispatch one command. Returns whether the text was a command.
    pub async fn handle(&self, ctx: &CommandContext) -> Result<bool> {
        let Some(parsed) = parse_command(&ctx.text) else {
            return Ok(false);
        };

        if self.bans.is_banned(ctx.chat_id, ctx.user_id).await {
            return Ok(true);
        }

        match parsed.command.as_str() {
            "ask" => self.handle_ask(ctx, &parsed.args, "ask").await?,
            "smart" => self.handle_ask(ctx, &parsed.args, "smart").await?,
            "summary" => self.handle_summary(ctx, &parsed.args).await?,
            "truth" => self.handle_truth(ctx, &parsed.args).await?,
            "start" => self.handle_start(ctx).await?,
            other => {
                // Admin surface: private chat from the configured admin only.
                if ctx.is_private() && self.is_admin(ctx) {
                    if let Some(reply) = self.admin.execute(other, &parsed.args).await {
                        self.transport.send_message(ctx.chat_id, &reply).await?;
                    }
                }
            }
        }

        Ok(true)
    }

    async fn handle_ask(&self, ctx: &CommandContext, args: &str, command: &str) -> Result<()> {
        let question = args.trim();
        if question.is_empty() {
            self.transport.send_message(ctx.chat_id, ASK_HELP).await?;
            return Ok(());
        }

        let task = AskTask {
            chat_id: ctx.chat_id,
            user_id: ctx.user_id,
            display_name: ctx.display_name.clone(),
            username: ctx.username.clone(),
            question: question.to_string(),
            command: command.to_string(),
        };

        match self.ask_queue.enqueue(&task).await {
            Ok(_) => {
                self.transport.send_typing(ctx.chat_id).await?;
            }
            Err(Error::QueueFull(_)) => {
                self.transport.send_message(ctx.chat_id, TRY_AGAIN).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn handle_summary(&self, ctx: &CommandContext, args: &str) -> Result<()> {
        let hours = parse_summary_hours(args);
        let task = SummaryTask {
            chat_id: ctx.chat_id,
            requested_by: Some(ctx.user_id),
            hours,
        };

        match self.summary_queue.enqueue(&task).await {
            Ok(_) => {
                self.transport
                    .send_message(ctx.chat_id, &format!("Готовлю сводку за {hours} ч."))
                    .await?;
            }
            Err(Error::QueueFull(_)) => {
                self.transport.send_message(ctx.chat_id, TRY_AGAIN).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn handle_truth(&self, ctx: &CommandContext, args: &str) -> Result<()> {
        let count = parse_truth_count(args);
        let task = TruthTask {
            chat_id: ctx.chat_id,
            requested_by: ctx.user_id,
            message_count: count,
        };

        match self.truth_queue.enqueue(&task).await {
            Ok(_) => {
                self.transport
                    .send_message(
                        ctx.chat_id,
                        &format!("Проверяю последние {count} сообщений..."),
                    )
                    .await?;
            }
            Err(Error::QueueFull(_)) => {
                self.transport.send_message(ctx.chat_id, TRY_AGAIN).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn handle_start(&self, ctx: &CommandContext) -> Result<()> {
        if ctx.is_private() {
            self.transport
                .send_with_button(
                    ctx.chat_id,
                    START_PRIVATE_REPLY,
                    "Добавить в чат",
                    &self.bot_invite_url,
                )
                .await?;
        } else {
            self.transport
                .send_message(ctx.chat_id, START_GROUP_REPLY)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_basic() {
        let parsed = parse_command("/ask кто тут?").unwrap();
        assert_eq!(parsed.command, "ask");
        assert_eq!(parsed.args, "кто тут?");
    }

    #[test]
    fn test_parse_command_with_bot_suffix() {
        let parsed = parse_command("/summary@chatwarden_bot 48").unwrap();
        assert_eq!(parsed.command, "summary");
        assert_eq!(parsed.args, "48");
    }

    #[test]
    fn test_parse_non_commands() {
        assert_eq!(parse_command("обычное сообщение"), None);
        assert_eq!(parse_command("/"), None);
        assert_eq!(parse_command("5/3"), None);
    }

    #[test]
    fn test_truth_count_bounds() {
        assert_eq!(parse_truth_count(""), 5);
        assert_eq!(parse_truth_count("0"), 5);
        assert_eq!(parse_truth_count("-5"), 5);
        assert_eq!(parse_truth_count("abc"), 5);
        assert_eq!(parse_truth_count("100"), 15);
        assert_eq!(parse_truth_count("7"), 7);
        assert_eq!(parse_truth_count("15"), 15);
    }

    #[test]
    fn test_summary_hours_bounds() {
        assert_eq!(parse_summary_hours(""), 24);
        assert_eq!(parse_summary_hours("48"), 48);
        assert_eq!(parse_summary_hours("9000"), 168);
        assert_eq!(parse_summary_hours("0"), 24);
        assert_eq!(parse_summary_hours("мусор"), 24);
    }

    #[test]
    fn test_ask_help_mentions_usage() {
        assert!(ASK_HELP.contains("/ask"));
    }
}
