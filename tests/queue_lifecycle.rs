//! Queue service lifecycle tests
//!
//! Cover the lease/retry/dead-letter state machine against a real
//! database. Skipped without TEST_DATABASE_URL.

mod common;

use std::time::Duration;

use chatwarden::queue::{
    AskTask, NotificationBridge, ProfileTask, QueueConfig, TypedQueue,
};
use chrono::{DateTime, Utc};
use common::TestFixture;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

fn config(table: &'static str, name: &'static str, max_attempts: i32) -> QueueConfig {
    QueueConfig {
        table,
        queue_name: name,
        max_attempts,
        base_retry_delay: Duration::from_secs(30),
        max_retry_delay: Duration::from_secs(600),
        lease_timeout: Duration::from_secs(300),
        retention: Duration::from_secs(86_400),
        capacity: 1000,
    }
}

async fn drain(pool: &sqlx::PgPool, table: &str) {
    sqlx::query(&format!("DELETE FROM {table}"))
        .execute(pool)
        .await
        .expect("drain");
}

fn ask_task(question: &str) -> AskTask {
    AskTask {
        chat_id: TestFixture::unique_chat_id(),
        user_id: 67890,
        display_name: "Тест".into(),
        username: Some("testuser".into()),
        question: question.into(),
        command: "ask".into(),
    }
}

#[tokio::test]
#[serial]
async fn test_enqueue_pick_returns_same_payload() {
    let Some(fixture) = TestFixture::new().await else { return };
    drain(fixture.pool(), "message_queue").await;

    let queue: TypedQueue<ProfileTask> =
        TypedQueue::new(fixture.pool().clone(), config("message_queue", "message", 5));

    let task = ProfileTask {
        chat_id: -100123,
        user_id: 67890,
        message_id: 9001,
    };
    let id = queue.enqueue(&task).await.expect("enqueue");

    let item = queue.pick().await.expect("pick").expect("row available");
    assert_eq!(item.id, id);
    assert_eq!(item.payload, task);
    assert_eq!(item.attempt_count, 1);
}

#[tokio::test]
#[serial]
async fn test_failure_schedules_backoff_retry_then_success_clears_error() {
    let Some(fixture) = TestFixture::new().await else { return };
    drain(fixture.pool(), "ask_queue").await;

    let queue: TypedQueue<AskTask> =
        TypedQueue::new(fixture.pool().clone(), config("ask_queue", "ask", 3));

    queue.enqueue(&ask_task("будет ли ретрай?")).await.expect("enqueue");
    let item = queue.pick().await.expect("pick").expect("row");
    assert_eq!(item.attempt_count, 1);

    queue
        .fail(item.id, item.attempt_count, "handler exploded")
        .await
        .expect("fail");

    let (attempts, next_run_at, error, processed) =
        sqlx::query_as::<_, (i32, DateTime<Utc>, Option<String>, bool)>(
            "SELECT attempt_count, next_run_at, last_error, processed FROM ask_queue WHERE id = $1",
        )
        .bind(item.id)
        .fetch_one(fixture.pool())
        .await
        .expect("row fetch");

    assert_eq!(attempts, 1);
    assert!(!processed);
    assert_eq!(error.as_deref(), Some("handler exploded"));
    // base 30s with ±20% jitter
    let delay = (next_run_at - Utc::now()).num_seconds();
    assert!((20..=40).contains(&delay), "unexpected retry delay {delay}s");

    // Second attempt succeeds after the delay elapses
    sqlx::query("UPDATE ask_queue SET next_run_at = now() WHERE id = $1")
        .bind(item.id)
        .execute(fixture.pool())
        .await
        .expect("reschedule");

    let retry = queue.pick().await.expect("pick").expect("row ready again");
    assert_eq!(retry.id, item.id);
    assert_eq!(retry.attempt_count, 2);
    queue.complete(retry.id, retry.created_at).await.expect("complete");

    let (processed, picked_at, error) =
        sqlx::query_as::<_, (bool, Option<DateTime<Utc>>, Option<String>)>(
            "SELECT processed, picked_at, last_error FROM ask_queue WHERE id = $1",
        )
        .bind(item.id)
        .fetch_one(fixture.pool())
        .await
        .expect("row fetch");

    assert!(processed);
    assert_eq!(picked_at, None);
    assert_eq!(error, None, "retry noise must clear on completion");
}

#[tokio::test]
#[serial]
async fn test_exhausted_attempts_dead_letter() {
    let Some(fixture) = TestFixture::new().await else { return };
    drain(fixture.pool(), "truth_queue").await;

    let queue: TypedQueue<AskTask> =
        TypedQueue::new(fixture.pool().clone(), config("truth_queue", "truth", 2));

    queue.enqueue(&ask_task("всегда падает")).await.expect("enqueue");

    for expected_attempt in 1..=2 {
        sqlx::query("UPDATE truth_queue SET next_run_at = now() WHERE processed = FALSE")
            .execute(fixture.pool())
            .await
            .expect("reschedule");
        let item = queue.pick().await.expect("pick").expect("row");
        assert_eq!(item.attempt_count, expected_attempt);
        queue
            .fail(item.id, item.attempt_count, "permanent boom")
            .await
            .expect("fail");
    }

    let (processed, error) = sqlx::query_as::<_, (bool, Option<String>)>(
        "SELECT processed, last_error FROM truth_queue ORDER BY id DESC LIMIT 1",
    )
    .fetch_one(fixture.pool())
    .await
    .expect("row fetch");

    assert!(processed);
    assert!(error.expect("error recorded").starts_with("[DEAD]"));

    // Dead rows are invisible to subsequent picks
    assert!(queue.pick().await.expect("pick").is_none());
}

#[tokio::test]
#[serial]
async fn test_stale_lease_reclaim() {
    let Some(fixture) = TestFixture::new().await else { return };
    drain(fixture.pool(), "summary_queue").await;

    let mut stale_config = config("summary_queue", "summary", 3);
    stale_config.lease_timeout = Duration::from_secs(0);
    let queue: TypedQueue<AskTask> =
        TypedQueue::new(fixture.pool().clone(), stale_config);

    queue.enqueue(&ask_task("воркер умер")).await.expect("enqueue");
    let item = queue.pick().await.expect("pick").expect("row");
    // Simulate a crashed worker: no complete, no fail.

    let (requeued, dead) = queue.service().recover_stale().await.expect("sweep");
    assert_eq!(requeued, 1);
    assert_eq!(dead, 0);

    let (picked_at, error) = sqlx::query_as::<_, (Option<DateTime<Utc>>, Option<String>)>(
        "SELECT picked_at, last_error FROM summary_queue WHERE id = $1",
    )
    .bind(item.id)
    .fetch_one(fixture.pool())
    .await
    .expect("row fetch");

    assert_eq!(picked_at, None);
    assert!(error.expect("stale marker").contains("[STALE]"));

    // The row is ready again
    let again = queue.pick().await.expect("pick").expect("reclaimed row");
    assert_eq!(again.id, item.id);
    assert_eq!(again.attempt_count, 2);
}

#[tokio::test]
#[serial]
async fn test_pending_count_excludes_leased_rows() {
    let Some(fixture) = TestFixture::new().await else { return };
    drain(fixture.pool(), "ask_queue").await;

    let queue: TypedQueue<AskTask> =
        TypedQueue::new(fixture.pool().clone(), config("ask_queue", "ask", 3));

    queue.enqueue(&ask_task("первый")).await.expect("enqueue");
    queue.enqueue(&ask_task("второй")).await.expect("enqueue");
    assert_eq!(queue.service().pending_count().await.expect("count"), 2);

    let _leased = queue.pick().await.expect("pick").expect("row");
    assert_eq!(queue.service().pending_count().await.expect("count"), 1);
}

#[tokio::test]
#[serial]
async fn test_notification_wakeup_within_a_second() {
    let Some(fixture) = TestFixture::new().await else { return };
    drain(fixture.pool(), "question_generation_queue").await;

    let url = std::env::var("TEST_DATABASE_URL").expect("guarded above");
    let queue_config = config("question_generation_queue", "question_generation", 3);
    let channel = queue_config.channel();

    let mut bridge = NotificationBridge::new(&url);
    let mut mailbox = bridge.register(&channel);

    let shutdown = CancellationToken::new();
    let bridge_token = shutdown.clone();
    let bridge_handle = tokio::spawn(async move { bridge.run(bridge_token).await });

    // Give the LISTEN connection a moment to come up
    tokio::time::sleep(Duration::from_millis(300)).await;

    let queue: TypedQueue<chatwarden::queue::QuestionGenTask> =
        TypedQueue::new(fixture.pool().clone(), queue_config);
    let id = queue
        .enqueue(&chatwarden::queue::QuestionGenTask {
            chat_id: -100123,
            message_id: 424242,
        })
        .await
        .expect("enqueue");

    let woken = mailbox.wait(Duration::from_secs(1)).await;
    assert_eq!(woken, Some(id), "worker should wake well under a second");

    shutdown.cancel();
    let _ = bridge_handle.await;
}
