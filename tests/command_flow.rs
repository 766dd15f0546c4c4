//! Command dispatch boundary tests
//!
//! Validation and acknowledgement behaviour with a recording transport;
//! enqueueing goes through real queue tables. Skipped without
//! TEST_DATABASE_URL.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatwarden::commands::{AdminContext, AdminRegistry, CommandContext, CommandDispatcher};
use chatwarden::indexing::IndexingMetrics;
use chatwarden::llm::{LlmRouter, PromptRegistry};
use chatwarden::queue::{self, TypedQueue};
use chatwarden::store::{bans::BanService, chats::ChatRegistry};
use chatwarden::transport::ChatTransport;
use common::TestFixture;
use serial_test::serial;

#[derive(Default)]
struct RecordingTransport {
    messages: Mutex<Vec<String>>,
    typing: Mutex<u32>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<String> {
        self.messages.lock().expect("lock").clone()
    }

    fn typing_count(&self) -> u32 {
        *self.typing.lock().expect("lock")
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, _chat_id: i64, text: &str) -> chatwarden::Result<()> {
        self.messages.lock().expect("lock").push(text.to_string());
        Ok(())
    }

    async fn send_typing(&self, _chat_id: i64) -> chatwarden::Result<()> {
        *self.typing.lock().expect("lock") += 1;
        Ok(())
    }

    async fn send_with_button(
        &self,
        _chat_id: i64,
        text: &str,
        button_label: &str,
        _button_url: &str,
    ) -> chatwarden::Result<()> {
        self.messages
            .lock()
            .expect("lock")
            .push(format!("{text} [{button_label}]"));
        Ok(())
    }
}

fn dispatcher(
    fixture: &TestFixture,
    transport: Arc<RecordingTransport>,
) -> CommandDispatcher {
    let pool = fixture.pool().clone();
    let admin = AdminRegistry::new(AdminContext {
        db: fixture.db.clone(),
        queues: vec![],
        handlers: vec![],
        indexing_metrics: IndexingMetrics::shared(),
        prompts: Arc::new(PromptRegistry::with_defaults()),
        router: Arc::new(LlmRouter::new(vec![])),
        chats: ChatRegistry::new(pool.clone()),
    });

    CommandDispatcher::new(
        transport,
        BanService::new(pool.clone()),
        TypedQueue::new(pool.clone(), queue::ask_queue()),
        TypedQueue::new(pool.clone(), queue::summary_queue()),
        TypedQueue::new(pool, queue::truth_queue()),
        admin,
        1,
        "admin",
        "https://t.me/test_bot?startgroup=true",
    )
}

fn group_ctx(chat_id: i64, text: &str) -> CommandContext {
    CommandContext {
        chat_id,
        chat_type: "supergroup".into(),
        user_id: 67890,
        display_name: "Тест".into(),
        username: Some("testuser".into()),
        text: text.into(),
    }
}

async fn queued_for_chat(pool: &sqlx::PgPool, table: &str, chat_id: i64) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {table} WHERE (payload->>'chat_id')::BIGINT = $1"
    ))
    .bind(chat_id)
    .fetch_one(pool)
    .await
    .expect("count")
}

#[tokio::test]
#[serial]
async fn test_blank_ask_sends_help_without_enqueue() {
    let Some(fixture) = TestFixture::new().await else { return };
    let chat_id = TestFixture::unique_chat_id();
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = dispatcher(&fixture, transport.clone());

    for text in ["/ask", "/ask   "] {
        assert!(dispatcher.handle(&group_ctx(chat_id, text)).await.expect("handle"));
    }

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].contains("/ask"), "help text expected, got {:?}", sent[0]);
    assert_eq!(queued_for_chat(fixture.pool(), "ask_queue", chat_id).await, 0);
}

#[tokio::test]
#[serial]
async fn test_ask_with_question_enqueues_and_shows_typing() {
    let Some(fixture) = TestFixture::new().await else { return };
    let chat_id = TestFixture::unique_chat_id();
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = dispatcher(&fixture, transport.clone());

    dispatcher
        .handle(&group_ctx(chat_id, "/ask какие языки программирования используются в чате?"))
        .await
        .expect("handle");

    assert_eq!(transport.typing_count(), 1);
    assert_eq!(queued_for_chat(fixture.pool(), "ask_queue", chat_id).await, 1);
}

#[tokio::test]
#[serial]
async fn test_truth_invalid_counts_default_to_five() {
    let Some(fixture) = TestFixture::new().await else { return };
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = dispatcher(&fixture, transport.clone());

    for args in ["0", "-5", "abc"] {
        let chat_id = TestFixture::unique_chat_id();
        dispatcher
            .handle(&group_ctx(chat_id, &format!("/truth {args}")))
            .await
            .expect("handle");
    }

    for ack in transport.sent() {
        assert!(ack.contains("5 сообщений"), "expected default 5 in ack {ack:?}");
    }
}

#[tokio::test]
#[serial]
async fn test_truth_large_count_capped_at_fifteen() {
    let Some(fixture) = TestFixture::new().await else { return };
    let chat_id = TestFixture::unique_chat_id();
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = dispatcher(&fixture, transport.clone());

    dispatcher
        .handle(&group_ctx(chat_id, "/truth 100"))
        .await
        .expect("handle");

    let sent = transport.sent();
    assert!(sent[0].contains("15 сообщений"), "expected cap in ack {:?}", sent[0]);
}

#[tokio::test]
#[serial]
async fn test_start_branches_on_chat_type() {
    let Some(fixture) = TestFixture::new().await else { return };
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = dispatcher(&fixture, transport.clone());

    dispatcher
        .handle(&group_ctx(TestFixture::unique_chat_id(), "/start"))
        .await
        .expect("group start");

    let mut private = group_ctx(555, "/start");
    private.chat_type = "private".into();
    dispatcher.handle(&private).await.expect("private start");

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(!sent[0].contains('['), "group start is a short reply");
    assert!(sent[1].contains("[Добавить в чат]"), "private start carries the button");
}

#[tokio::test]
#[serial]
async fn test_plain_text_is_not_a_command() {
    let Some(fixture) = TestFixture::new().await else { return };
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = dispatcher(&fixture, transport.clone());

    let handled = dispatcher
        .handle(&group_ctx(TestFixture::unique_chat_id(), "просто сообщение"))
        .await
        .expect("handle");
    assert!(!handled);
    assert!(transport.sent().is_empty());
}
