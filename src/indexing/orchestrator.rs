//! Indexing orchestrator loop
//!
//! Runs each enabled handler to exhaustion (bounded by
//! `max_batches_per_run`) with a short delay between batches, then sleeps
//! the long idle delay once every handler reports no more work. Provider
//! rate limits pause the whole loop instead of hammering the API.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{EmbeddingHandler, IndexingMetrics};
use crate::config::Config;

pub struct IndexingOrchestrator {
    handlers: Vec<Arc<dyn EmbeddingHandler>>,
    metrics: Arc<IndexingMetrics>,
    batch_size: usize,
    max_batches_per_run: usize,
    batch_delay: Duration,
    idle_delay: Duration,
    rate_limit_pause: Duration,
}

impl IndexingOrchestrator {
    pub fn new(
        handlers: Vec<Arc<dyn EmbeddingHandler>>,
        metrics: Arc<IndexingMetrics>,
        config: &Config,
    ) -> Self {
        Self {
            handlers,
            metrics,
            batch_size: config.index_batch_size,
            max_batches_per_run: config.max_batches_per_run,
            batch_delay: config.batch_delay,
            idle_delay: config.idle_delay,
            rate_limit_pause: config.rate_limit_pause,
        }
    }

    pub fn metrics(&self) -> &Arc<IndexingMetrics> {
        &self.metrics
    }

    pub fn handlers(&self) -> &[Arc<dyn EmbeddingHandler>] {
        &self.handlers
    }

    /// Run until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            "Indexing orchestrator started with {} handlers",
            self.handlers.len()
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let mut any_work = false;
            for handler in &self.handlers {
                if shutdown.is_cancelled() {
                    break;
                }
                if !handler.enabled() {
                    continue;
                }
                if self.drain_handler(handler.as_ref(), &shutdown).await {
                    any_work = true;
                }
            }

            let delay = if any_work { self.batch_delay } else { self.idle_delay };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!("Indexing orchestrator stopped");
    }

    /// Run one handler to exhaustion. Returns whether it did any work.
    async fn drain_handler(
        &self,
        handler: &dyn EmbeddingHandler,
        shutdown: &CancellationToken,
    ) -> bool {
        let mut any_work = false;

        for _ in 0..self.max_batches_per_run {
            if shutdown.is_cancelled() {
                break;
            }

            match handler.process_batch(self.batch_size).await {
                Ok(outcome) => {
                    if outcome.processed > 0 {
                        any_work = true;
                        tracing::debug!(
                            handler = handler.name(),
                            processed = outcome.processed,
                            elapsed_ms = outcome.elapsed.as_millis() as u64,
                            "Indexing batch done"
                        );
                    }
                    if !outcome.has_more {
                        break;
                    }
                }
                Err(e) if e.is_rate_limit() => {
                    self.metrics.record_rate_limit_pause();
                    tracing::warn!(
                        handler = handler.name(),
                        "Rate limited, pausing indexing for {}s",
                        self.rate_limit_pause.as_secs()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.rate_limit_pause) => {}
                        _ = shutdown.cancelled() => {}
                    }
                    break;
                }
                Err(e) => {
                    self.metrics.record_failure();
                    tracing::warn!(handler = handler.name(), "Indexing batch failed: {e}");
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.batch_delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        any_work
    }
}
