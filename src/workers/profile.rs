//! Fact-extraction worker over the message queue
//!
//! Unlike the other queue workers this one drains rows in batches and
//! groups them by (chat, user) so one LLM call covers a user's recent
//! messages. Rows of a failed group fail individually and retry with
//! backoff; a group's success completes all of its rows.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::profile::FactExtractor;
use crate::queue::{Mailbox, ProfileTask, QueueItem, TypedQueue};

const IDLE_WAIT: Duration = Duration::from_secs(30);

pub struct FactWorker {
    queue: TypedQueue<ProfileTask>,
    extractor: FactExtractor,
    batch_size: i64,
}

impl FactWorker {
    pub fn new(queue: TypedQueue<ProfileTask>, extractor: FactExtractor, batch_size: i64) -> Self {
        Self {
            queue,
            extractor,
            batch_size,
        }
    }

    pub async fn run(&self, mut mailbox: Mailbox, shutdown: CancellationToken) {
        tracing::info!("fact worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let batch = match self.lease_batch().await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!("fact worker lease error: {e}");
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = mailbox.wait(IDLE_WAIT) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }

            self.process_batch(batch).await;
        }

        tracing::info!("fact worker stopped");
    }

    async fn lease_batch(&self) -> Result<Vec<QueueItem<ProfileTask>>> {
        let mut batch = Vec::new();
        for _ in 0..self.batch_size {
            match self.queue.pick().await? {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        Ok(batch)
    }

    async fn process_batch(&self, batch: Vec<QueueItem<ProfileTask>>) {
        // Group leased rows by (chat, user); one LLM request per group.
        let mut groups: HashMap<(i64, i64), Vec<QueueItem<ProfileTask>>> = HashMap::new();
        for item in batch {
            groups
                .entry((item.payload.chat_id, item.payload.user_id))
                .or_default()
                .push(item);
        }

        for ((chat_id, user_id), items) in groups {
            let message_ids: Vec<i64> = items.iter().map(|i| i.payload.message_id).collect();

            match self
                .extractor
                .extract_for_user(chat_id, user_id, &message_ids)
                .await
            {
                Ok(written) => {
                    if written > 0 {
                        tracing::debug!(chat_id, user_id, written, "Facts extracted");
                    }
                    for item in items {
                        if let Err(e) = self.queue.complete(item.id, item.created_at).await {
                            tracing::error!("fact worker failed to complete {}: {e}", item.id);
                        }
                    }
                }
                Err(e) => {
                    let error = e.to_string();
                    tracing::warn!(chat_id, user_id, "Fact extraction failed: {error}");
                    for item in items {
                        if let Err(mark) =
                            self.queue.fail(item.id, item.attempt_count, &error).await
                        {
                            tracing::error!("fact worker failed to mark {}: {mark}", item.id);
                        }
                    }
                }
            }
        }
    }
}
