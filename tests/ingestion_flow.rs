//! Ingestion pipeline flow tests
//!
//! Idempotent saves, the group-chat gate, the length threshold for
//! embedding work and the repeated-message filter, all against a real
//! database. Skipped without TEST_DATABASE_URL.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatwarden::embedding::EmbeddingProvider;
use chatwarden::indexing::{EmbeddingHandler, IndexingMetrics, MessageEmbeddingHandler};
use chatwarden::ingest::{IncomingMessage, IngestOutcome, IngestPipeline};
use chatwarden::profile::{AliasService, RelationshipService};
use chatwarden::queue::{self, TypedQueue};
use chatwarden::store::{bans::BanService, chats::ChatRegistry, MessageStore};
use chrono::Utc;
use common::{TestFixture, TEST_EMBEDDING_DIM};
use serial_test::serial;

fn pipeline(fixture: &TestFixture) -> IngestPipeline {
    let pool = fixture.pool().clone();
    IngestPipeline::new(
        MessageStore::new(pool.clone()),
        ChatRegistry::new(pool.clone()),
        BanService::new(pool.clone()),
        AliasService::new(pool.clone()),
        RelationshipService::new(pool.clone()),
        TypedQueue::new(pool.clone(), queue::message_queue()),
        TypedQueue::new(pool, queue::question_generation_queue()),
        6,
    )
}

fn incoming(chat_id: i64, message_id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id,
        chat_title: Some("Тестовый чат".into()),
        chat_type: "supergroup".into(),
        thread_id: None,
        message_id,
        user_id: 67890,
        username: Some("testuser".into()),
        display_name: Some("Тест Тестович".into()),
        text: Some(text.into()),
        sent_at: Utc::now(),
        has_links: false,
        has_media: false,
        reply_to: None,
        message_type: "text".into(),
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
async fn test_save_is_idempotent() {
    let Some(fixture) = TestFixture::new().await else { return };
    let chat_id = TestFixture::unique_chat_id();
    let pipeline = pipeline(&fixture);

    let msg = incoming(chat_id, 9001, "Тестовое сообщение");
    assert_eq!(pipeline.handle(msg.clone()).await.expect("first"), IngestOutcome::Saved);

    // Second delivery of the same (chat, message) is a no-op, not an error.
    // A fresh pipeline avoids the in-memory dedup filter short-circuit.
    let pipeline2 = self::pipeline(&fixture);
    assert_eq!(
        pipeline2.handle(msg).await.expect("second"),
        IngestOutcome::AlreadySaved
    );

    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM messages WHERE chat_id = $1 AND message_id = 9001",
    )
    .bind(chat_id)
    .fetch_one(fixture.pool())
    .await
    .expect("count");
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn test_private_chat_is_not_persisted() {
    let Some(fixture) = TestFixture::new().await else { return };
    let chat_id = TestFixture::unique_chat_id();
    let pipeline = pipeline(&fixture);

    let mut msg = incoming(chat_id, 1, "личное сообщение боту");
    msg.chat_type = "private".into();
    assert_eq!(pipeline.handle(msg).await.expect("handle"), IngestOutcome::Ignored);

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE chat_id = $1")
        .bind(chat_id)
        .fetch_one(fixture.pool())
        .await
        .expect("count");
    assert_eq!(count, 0);
}

#[tokio::test]
#[serial]
async fn test_short_text_saved_but_not_enqueued() {
    let Some(fixture) = TestFixture::new().await else { return };
    let chat_id = TestFixture::unique_chat_id();
    let pipeline = pipeline(&fixture);

    assert_eq!(
        pipeline.handle(incoming(chat_id, 1, "hi")).await.expect("short"),
        IngestOutcome::Saved
    );
    assert_eq!(
        pipeline
            .handle(incoming(chat_id, 2, "Достаточно длинное сообщение"))
            .await
            .expect("long"),
        IngestOutcome::Saved
    );

    // Derivation tasks are fire-and-forget; give them a beat.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(queued_for_chat(fixture.pool(), "message_queue", chat_id).await, 1);

    let saved = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE chat_id = $1")
        .bind(chat_id)
        .fetch_one(fixture.pool())
        .await
        .expect("count");
    assert_eq!(saved, 2, "short messages persist even without embedding work");
}

#[tokio::test]
#[serial]
async fn test_repeated_message_dropped_within_ttl() {
    let Some(fixture) = TestFixture::new().await else { return };
    let chat_id = TestFixture::unique_chat_id();
    let pipeline = pipeline(&fixture);

    let text = "повторяющееся сообщение достаточной длины";
    assert_eq!(
        pipeline.handle(incoming(chat_id, 1, text)).await.expect("first"),
        IngestOutcome::Saved
    );
    assert_eq!(
        pipeline.handle(incoming(chat_id, 2, text)).await.expect("repeat"),
        IngestOutcome::Duplicate
    );

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE chat_id = $1")
        .bind(chat_id)
        .fetch_one(fixture.pool())
        .await
        .expect("count");
    assert_eq!(count, 1);
}

/// Deterministic embedder for indexing tests.
struct StubEmbedder;

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn name(&self) -> &str {
        "stub"
    }

    fn dimension(&self) -> usize {
        TEST_EMBEDDING_DIM
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> chatwarden::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.trim().is_empty() {
                    Vec::new()
                } else {
                    (0..TEST_EMBEDDING_DIM)
                        .map(|i| ((t.len() + i) % 10) as f32 / 10.0)
                        .collect()
                }
            })
            .collect())
    }
}

#[tokio::test]
#[serial]
async fn test_indexer_embeds_saved_message_with_configured_dimension() {
    let Some(fixture) = TestFixture::new().await else { return };
    let chat_id = TestFixture::unique_chat_id();
    let pipeline = pipeline(&fixture);

    pipeline
        .handle(incoming(chat_id, 77, "Достаточно длинное сообщение для индекса"))
        .await
        .expect("save");

    let handler = MessageEmbeddingHandler::new(
        fixture.pool().clone(),
        MessageStore::new(fixture.pool().clone()),
        Arc::new(StubEmbedder),
        IndexingMetrics::shared(),
        6,
    );

    // Drain the backlog (other tests may have left unembedded rows).
    loop {
        let outcome = handler.process_batch(64).await.expect("batch");
        if !outcome.has_more {
            break;
        }
    }

    let dims = sqlx::query_scalar::<_, i32>(
        "SELECT vector_dims(embedding) FROM message_embeddings
         WHERE chat_id = $1 AND message_id = 77 AND chunk_index = 0",
    )
    .bind(chat_id)
    .fetch_one(fixture.pool())
    .await
    .expect("embedding row exists");

    assert_eq!(dims as usize, TEST_EMBEDDING_DIM);
}
