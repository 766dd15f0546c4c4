//! Embedding pipeline: handlers and orchestrator
//!
//! Each handler indexes one embedding kind (per-message, sliding-window
//! context, hypothetical questions) behind a common capability interface;
//! the orchestrator drives enabled handlers to exhaustion with bounded
//! batches and shared metrics.

pub mod context;
pub mod messages;
pub mod orchestrator;
pub mod questions;

pub use context::ContextEmbeddingHandler;
pub use messages::MessageEmbeddingHandler;
pub use orchestrator::IndexingOrchestrator;
pub use questions::QuestionGenerationHandler;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Coverage numbers for one handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub total: i64,
    pub indexed: i64,
    pub pending: i64,
}

/// Result of one batch run.
#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    pub processed: usize,
    pub elapsed: Duration,
    pub has_more: bool,
}

/// One embedding kind behind the pipeline interface.
#[async_trait]
pub trait EmbeddingHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool {
        true
    }

    async fn get_stats(&self) -> Result<IndexStats>;

    /// Process up to `batch_size` items. `has_more` signals that another
    /// batch should follow immediately.
    async fn process_batch(&self, batch_size: usize) -> Result<BatchOutcome>;
}

/// Shared counters across every handler.
#[derive(Debug, Default)]
pub struct IndexingMetrics {
    pub batches_run: AtomicU64,
    pub items_indexed: AtomicU64,
    pub failures: AtomicU64,
    pub rate_limit_pauses: AtomicU64,
}

impl IndexingMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_batch(&self, processed: usize) {
        self.batches_run.fetch_add(1, Ordering::Relaxed);
        self.items_indexed.fetch_add(processed as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_pause(&self) {
        self.rate_limit_pauses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.batches_run.load(Ordering::Relaxed),
            self.items_indexed.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
            self.rate_limit_pauses.load(Ordering::Relaxed),
        )
    }
}
