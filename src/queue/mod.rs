//! Resilient table-backed work queues
//!
//! One table per logical queue, identical bookkeeping columns plus a JSONB
//! payload. Delivery is at-least-once: a row is either processed or will
//! become ready again within one lease interval after a crash. Handlers
//! must be idempotent.

pub mod metrics;
pub mod notify;
pub mod service;
pub mod worker;

pub use metrics::QueueMetrics;
pub use notify::{Mailbox, NotificationBridge};
pub use service::{DashboardStats, QueueItem, QueueService, TypedQueue};
pub use worker::{run_worker, QueueWorker};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Static configuration for one logical queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Backing table name
    pub table: &'static str,
    /// Short queue name used in logs and channel naming
    pub queue_name: &'static str,
    pub max_attempts: i32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub lease_timeout: Duration,
    /// Completed rows older than this are removed by cleanup
    pub retention: Duration,
    /// Enqueue is rejected once this many rows are pending
    pub capacity: i64,
}

impl QueueConfig {
    /// NOTIFY channel for this queue.
    pub fn channel(&self) -> String {
        format!("{}_channel", self.queue_name)
    }
}

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Question answering requests.
pub fn ask_queue() -> QueueConfig {
    QueueConfig {
        table: "ask_queue",
        queue_name: "ask",
        max_attempts: 3,
        base_retry_delay: Duration::from_secs(30),
        max_retry_delay: Duration::from_secs(600),
        lease_timeout: Duration::from_secs(300),
        retention: 7 * DAY,
        capacity: 500,
    }
}

/// Periodic and on-demand summaries.
pub fn summary_queue() -> QueueConfig {
    QueueConfig {
        table: "summary_queue",
        queue_name: "summary",
        max_attempts: 3,
        base_retry_delay: Duration::from_secs(60),
        max_retry_delay: Duration::from_secs(900),
        lease_timeout: Duration::from_secs(600),
        retention: 7 * DAY,
        capacity: 200,
    }
}

/// Fact-check requests over recent messages.
pub fn truth_queue() -> QueueConfig {
    QueueConfig {
        table: "truth_queue",
        queue_name: "truth",
        max_attempts: 3,
        base_retry_delay: Duration::from_secs(30),
        max_retry_delay: Duration::from_secs(600),
        lease_timeout: Duration::from_secs(300),
        retention: 7 * DAY,
        capacity: 200,
    }
}

/// Messages queued for fact extraction and profile updates.
pub fn message_queue() -> QueueConfig {
    QueueConfig {
        table: "message_queue",
        queue_name: "message",
        max_attempts: 5,
        base_retry_delay: Duration::from_secs(60),
        max_retry_delay: Duration::from_secs(1800),
        lease_timeout: Duration::from_secs(600),
        retention: 3 * DAY,
        capacity: 50_000,
    }
}

/// Low-priority hypothetical question generation.
pub fn question_generation_queue() -> QueueConfig {
    QueueConfig {
        table: "question_generation_queue",
        queue_name: "question_generation",
        max_attempts: 3,
        base_retry_delay: Duration::from_secs(120),
        max_retry_delay: Duration::from_secs(3600),
        lease_timeout: Duration::from_secs(600),
        retention: 3 * DAY,
        capacity: 50_000,
    }
}

/// Payload for the ask queue (both /ask and /smart).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskTask {
    pub chat_id: i64,
    pub user_id: i64,
    pub display_name: String,
    pub username: Option<String>,
    pub question: String,
    /// "ask" or "smart"
    pub command: String,
}

/// Payload for the summary queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryTask {
    pub chat_id: i64,
    pub requested_by: Option<i64>,
    pub hours: i64,
}

/// Payload for the truth queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TruthTask {
    pub chat_id: i64,
    pub requested_by: i64,
    pub message_count: i64,
}

/// Payload for the message (fact extraction) queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileTask {
    pub chat_id: i64,
    pub user_id: i64,
    pub message_id: i64,
}

/// Payload for the question-generation queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionGenTask {
    pub chat_id: i64,
    pub message_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_naming() {
        assert_eq!(ask_queue().channel(), "ask_channel");
        assert_eq!(question_generation_queue().channel(), "question_generation_channel");
    }

    #[test]
    fn test_tables_match_schema() {
        let tables = [
            ask_queue().table,
            summary_queue().table,
            truth_queue().table,
            message_queue().table,
            question_generation_queue().table,
        ];
        for table in tables {
            assert!(crate::database::schema::QUEUE_TABLES.contains(&table));
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let task = AskTask {
            chat_id: -100123,
            user_id: 67890,
            display_name: "Test".into(),
            username: Some("testuser".into()),
            question: "что нового?".into(),
            command: "ask".into(),
        };
        let json = serde_json::to_value(&task).unwrap();
        let back: AskTask = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }
}
