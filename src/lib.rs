//! Chatwarden - group-chat analytics and retrieval bot
//!
//! Ingests a stream of chat messages, persists them with derived signals,
//! maintains a semantic index over utterances and conversational windows,
//! and answers retrieval-augmented questions, summaries and fact-checks.
//! Work flows through resilient table-backed queues with lease-based
//! at-least-once delivery.

pub mod commands;
pub mod config;
pub mod database;
pub mod embedding;
pub mod error;
pub mod http_client;
pub mod indexing;
pub mod ingest;
pub mod llm;
pub mod profile;
pub mod queue;
pub mod retrieval;
pub mod service;
pub mod store;
pub mod transport;
pub mod workers;

// Re-export main types
pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
pub use service::Service;

// Re-export the queue contract
pub use queue::{QueueConfig, QueueService, TypedQueue};

// Re-export the retrieval surface
pub use retrieval::{RetrievalEngine, RetrievalOutcome, SearchRequest};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
