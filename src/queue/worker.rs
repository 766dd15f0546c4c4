//! Generic queue worker loop
//!
//! Drains a typed queue: pick → process → complete/fail. When the queue is
//! empty the worker parks on its notification mailbox with a timeout, so it
//! wakes within milliseconds of an enqueue yet still polls if notifications
//! are lost. Any handler error marks the row failed; cancellation simply
//! abandons the lease for the stale sweep to reclaim.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{Mailbox, QueueItem, TypedQueue};
use crate::error::Result;

const IDLE_WAIT: Duration = Duration::from_secs(30);

/// A consumer of one queue's payload type.
#[async_trait]
pub trait QueueWorker<T>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, item: &QueueItem<T>) -> Result<()>;
}

/// Run a worker until shutdown.
pub async fn run_worker<T, W>(
    queue: TypedQueue<T>,
    worker: W,
    mut mailbox: Mailbox,
    shutdown: CancellationToken,
) where
    T: Serialize + DeserializeOwned + Send + Sync,
    W: QueueWorker<T>,
{
    tracing::info!("{} worker started", worker.name());

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let item = match queue.pick().await {
            Ok(Some(item)) => item,
            Ok(None) => {
                tokio::select! {
                    _ = mailbox.wait(IDLE_WAIT) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }
            Err(e) => {
                tracing::warn!("{} worker pick error: {e}", worker.name());
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }
        };

        match worker.process(&item).await {
            Ok(()) => {
                if let Err(e) = queue.complete(item.id, item.created_at).await {
                    tracing::error!(
                        "{} worker failed to complete entry {}: {e}",
                        worker.name(),
                        item.id
                    );
                }
            }
            Err(e) => {
                if let Err(mark_err) = queue.fail(item.id, item.attempt_count, &e.to_string()).await
                {
                    tracing::error!(
                        "{} worker failed to mark entry {} failed: {mark_err}",
                        worker.name(),
                        item.id
                    );
                }
            }
        }
    }

    tracing::info!("{} worker stopped", worker.name());
}
