//! Health and recovery watchdog
//!
//! Periodically reclaims stale leases on every queue, runs retention
//! cleanup, and logs queue dashboards plus database health so operators
//! see drift before users do.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::database::Database;
use crate::queue::QueueService;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const CLEANUP_EVERY_SWEEPS: u64 = 60;
const STATS_EVERY_SWEEPS: u64 = 10;

pub struct Watchdog {
    db: Database,
    queues: Vec<QueueService>,
}

impl Watchdog {
    pub fn new(db: Database, queues: Vec<QueueService>) -> Self {
        Self { db, queues }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!("Watchdog started over {} queues", self.queues.len());
        let mut sweep = 0u64;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                _ = shutdown.cancelled() => break,
            }
            sweep += 1;

            for queue in &self.queues {
                if let Err(e) = queue.recover_stale().await {
                    tracing::warn!(
                        queue = queue.config().queue_name,
                        "Stale recovery failed: {e}"
                    );
                }
            }

            if sweep % CLEANUP_EVERY_SWEEPS == 0 {
                for queue in &self.queues {
                    if let Err(e) = queue.cleanup().await {
                        tracing::warn!(
                            queue = queue.config().queue_name,
                            "Cleanup failed: {e}"
                        );
                    }
                }
            }

            if sweep % STATS_EVERY_SWEEPS == 0 {
                match self.db.health_check().await {
                    Ok(health) if !health.is_healthy => {
                        tracing::warn!("Database unhealthy: {}", health.message);
                    }
                    Err(e) => tracing::warn!("Health check failed: {e}"),
                    _ => {}
                }

                for queue in &self.queues {
                    if let Ok(stats) = queue.dashboard_stats().await {
                        tracing::info!(
                            queue = %stats.queue,
                            ready = stats.ready,
                            in_flight = stats.in_flight,
                            dead = stats.dead,
                            avg_wait_ms = stats.avg_wait_ms as u64,
                            avg_processing_ms = stats.avg_processing_ms as u64,
                            "Queue stats"
                        );
                    }
                }
            }
        }

        tracing::info!("Watchdog stopped");
    }
}
