//! Narrow transport interface
//!
//! The chat platform itself (webhook plumbing, polling, markup rendering)
//! lives outside this crate; command handlers and workers only need these
//! few operations. Implementations must already speak the platform's
//! restricted HTML subset; replies are sanitised before they get here.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text message to a chat.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Show a typing indicator while a worker grinds.
    async fn send_typing(&self, chat_id: i64) -> Result<()>;

    /// Send a message with one inline URL button (onboarding).
    async fn send_with_button(
        &self,
        chat_id: i64,
        text: &str,
        button_label: &str,
        button_url: &str,
    ) -> Result<()>;
}

/// Transport that logs instead of sending; used by the CLI `status`
/// command and by tests.
pub struct NullTransport;

#[async_trait]
impl ChatTransport for NullTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        tracing::info!(chat_id, "send_message: {text}");
        Ok(())
    }

    async fn send_typing(&self, _chat_id: i64) -> Result<()> {
        Ok(())
    }

    async fn send_with_button(
        &self,
        chat_id: i64,
        text: &str,
        button_label: &str,
        _button_url: &str,
    ) -> Result<()> {
        tracing::info!(chat_id, "send_with_button [{button_label}]: {text}");
        Ok(())
    }
}
