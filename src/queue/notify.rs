//! LISTEN/NOTIFY bridge
//!
//! One dedicated connection listens on every queue channel and forwards
//! row ids into in-process unbounded mailboxes. Workers block on their
//! mailbox (with a timeout) whenever a pick comes back empty, which gives
//! sub-second wake-up latency while degrading to plain polling if the
//! listener connection is lost.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Receiving side of one queue's wake-up channel.
pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<i64>,
}

impl Mailbox {
    /// Wait for a wake-up, up to `timeout`. Drains at most one id; the
    /// worker re-picks in a loop anyway, so coalescing is harmless.
    pub async fn wait(&mut self, timeout: Duration) -> Option<i64> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Demultiplexes NOTIFY payloads into per-queue mailboxes.
pub struct NotificationBridge {
    database_url: String,
    senders: HashMap<String, mpsc::UnboundedSender<i64>>,
}

impl NotificationBridge {
    pub fn new(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            senders: HashMap::new(),
        }
    }

    /// Register a channel and get its mailbox. Must be called for every
    /// queue before `run` is spawned.
    pub fn register(&mut self, channel: &str) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(channel.to_string(), tx);
        Mailbox { rx }
    }

    /// Run the bridge until shutdown. Reconnects with a fixed delay on
    /// any connection error; malformed payloads are logged and dropped.
    pub async fn run(self, shutdown: CancellationToken) {
        let channels: Vec<String> = self.senders.keys().cloned().collect();
        if channels.is_empty() {
            return;
        }

        loop {
            if shutdown.is_cancelled() {
                return;
            }

            match self.listen_once(&channels, &shutdown).await {
                Ok(()) => return, // clean shutdown
                Err(e) => {
                    tracing::warn!("Notification bridge error, reconnecting: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        _ = shutdown.cancelled() => return,
                    }
                }
            }
        }
    }

    async fn listen_once(&self, channels: &[String], shutdown: &CancellationToken) -> Result<()> {
        let mut listener = PgListener::connect(&self.database_url).await?;
        let channel_refs: Vec<&str> = channels.iter().map(String::as_str).collect();
        listener.listen_all(channel_refs).await?;

        tracing::info!("Notification bridge listening on {} channels", channels.len());

        loop {
            let notification = tokio::select! {
                n = listener.recv() => n?,
                _ = shutdown.cancelled() => return Ok(()),
            };

            let channel = notification.channel();
            let payload = notification.payload();

            let id: i64 = match payload.parse() {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!("Dropping unparseable NOTIFY payload on {channel}: {payload:?}");
                    continue;
                }
            };

            if let Some(tx) = self.senders.get(channel) {
                // Receiver gone means its worker stopped; nothing to do.
                let _ = tx.send(id);
            } else {
                tracing::warn!("NOTIFY on unregistered channel {channel}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mailbox_times_out_when_empty() {
        let mut bridge = NotificationBridge::new("postgresql://localhost/unused");
        let mut mailbox = bridge.register("ask_channel");
        let got = mailbox.wait(Duration::from_millis(20)).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_mailbox_receives_registered_sends() {
        let mut bridge = NotificationBridge::new("postgresql://localhost/unused");
        let mut mailbox = bridge.register("ask_channel");
        bridge.senders.get("ask_channel").unwrap().send(42).unwrap();
        let got = mailbox.wait(Duration::from_millis(100)).await;
        assert_eq!(got, Some(42));
    }
}
