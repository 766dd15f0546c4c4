//! Cron-driven schedules
//!
//! Two jobs: the daily summary enqueues a summary task for every active
//! chat at the configured UTC hour; the nightly profile pass regenerates
//! user profiles. Both go through the same queues/generators the manual
//! paths use.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::{Error, Result};
use crate::profile::ProfileGenerator;
use crate::queue::{SummaryTask, TypedQueue};
use crate::store::chats::ChatRegistry;

pub struct Schedules {
    scheduler: JobScheduler,
}

impl Schedules {
    pub async fn start(
        chats: ChatRegistry,
        summary_queue: TypedQueue<SummaryTask>,
        profile_generator: Arc<ProfileGenerator>,
        daily_summary_hour: u32,
        nightly_profile_hour: u32,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Other(format!("Failed to create scheduler: {e}")))?;

        // Daily summary
        let summary_cron = format!("0 0 {daily_summary_hour} * * *");
        let summary_chats = chats.clone();
        let summary_job = Job::new_async(summary_cron.as_str(), move |_uuid, _lock| {
            let chats = summary_chats.clone();
            let queue = summary_queue.clone();
            Box::pin(async move {
                let chat_ids = match chats.active_chats().await {
                    Ok(ids) => ids,
                    Err(e) => {
                        tracing::error!("Daily summary: failed to list chats: {e}");
                        return;
                    }
                };
                tracing::info!("Daily summary fan-out to {} chats", chat_ids.len());
                for chat_id in chat_ids {
                    let task = SummaryTask {
                        chat_id,
                        requested_by: None,
                        hours: 24,
                    };
                    if let Err(e) = queue.enqueue(&task).await {
                        tracing::warn!(chat_id, "Daily summary enqueue failed: {e}");
                    }
                }
            })
        })
        .map_err(|e| Error::Other(format!("Failed to create summary job: {e}")))?;

        scheduler
            .add(summary_job)
            .await
            .map_err(|e| Error::Other(format!("Failed to add summary job: {e}")))?;

        // Nightly profiles
        let profile_cron = format!("0 0 {nightly_profile_hour} * * *");
        let profile_job = Job::new_async(profile_cron.as_str(), move |_uuid, _lock| {
            let chats = chats.clone();
            let generator = profile_generator.clone();
            Box::pin(async move {
                let chat_ids = match chats.active_chats().await {
                    Ok(ids) => ids,
                    Err(e) => {
                        tracing::error!("Nightly profiles: failed to list chats: {e}");
                        return;
                    }
                };
                for chat_id in chat_ids {
                    if let Err(e) = generator.generate_for_chat(chat_id).await {
                        tracing::warn!(chat_id, "Nightly profile pass failed: {e}");
                    }
                }
            })
        })
        .map_err(|e| Error::Other(format!("Failed to create profile job: {e}")))?;

        scheduler
            .add(profile_job)
            .await
            .map_err(|e| Error::Other(format!("Failed to add profile job: {e}")))?;

        scheduler
            .start()
            .await
            .map_err(|e| Error::Other(format!("Failed to start scheduler: {e}")))?;

        tracing::info!(
            "Schedules started: summary at {daily_summary_hour:02}:00 UTC, \
             profiles at {nightly_profile_hour:02}:00 UTC"
        );

        Ok(Self { scheduler })
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| Error::Other(format!("Failed to stop scheduler: {e}")))?;
        Ok(())
    }
}
