//! Message ingestion pipeline
//!
//! Per inbound message: dedup filter → group-chat gate → idempotent save →
//! parallel fire-and-forget derivation tasks (aliases, nicknames,
//! relationships, fact-queue enqueue, question-generation enqueue). The
//! spawned tasks never block the ingestion path and never surface their
//! failures to the transport; messages are already persisted, so derived
//! work can always be recomputed.

pub mod dedup;
pub mod nickname;
pub mod relationship;

pub use dedup::DedupFilter;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::profile::{AliasService, RelationshipService};
use crate::queue::{ProfileTask, QuestionGenTask, TypedQueue};
use crate::store::{bans::BanService, chats::ChatRegistry, MessageStore, NewMessage};

/// Messages at least this long are candidates for hypothetical questions.
const QUESTION_MIN_LENGTH: usize = 100;

/// Reply target metadata from the transport.
#[derive(Debug, Clone)]
pub struct ReplyTarget {
    pub message_id: i64,
    pub user_id: i64,
}

/// A transport-neutral inbound message.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub chat_type: String,
    pub thread_id: Option<i64>,
    pub message_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub text: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub has_links: bool,
    pub has_media: bool,
    pub reply_to: Option<ReplyTarget>,
    pub message_type: String,
}

/// Outcome of one ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Newly persisted
    Saved,
    /// Already persisted earlier; save was a no-op
    AlreadySaved,
    /// Dropped by the repeated-message filter
    Duplicate,
    /// Not a recognised group chat, or sender is banned
    Ignored,
}

#[derive(Clone)]
pub struct IngestPipeline {
    store: MessageStore,
    chats: ChatRegistry,
    bans: BanService,
    dedup: Arc<DedupFilter>,
    aliases: AliasService,
    relationships: RelationshipService,
    message_queue: TypedQueue<ProfileTask>,
    question_queue: TypedQueue<QuestionGenTask>,
    min_embed_length: usize,
}

impl IngestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: MessageStore,
        chats: ChatRegistry,
        bans: BanService,
        aliases: AliasService,
        relationships: RelationshipService,
        message_queue: TypedQueue<ProfileTask>,
        question_queue: TypedQueue<QuestionGenTask>,
        min_embed_length: usize,
    ) -> Self {
        Self {
            store,
            chats,
            bans,
            dedup: Arc::new(DedupFilter::new()),
            aliases,
            relationships,
            message_queue,
            question_queue,
            min_embed_length,
        }
    }

    /// Whether the transport chat type is a recognised group chat.
    pub fn is_group_chat(chat_type: &str) -> bool {
        matches!(chat_type, "group" | "supergroup")
    }

    /// Handle one inbound message.
    pub async fn handle(&self, incoming: IncomingMessage) -> Result<IngestOutcome> {
        if !Self::is_group_chat(&incoming.chat_type) {
            return Ok(IngestOutcome::Ignored);
        }
        if self.bans.is_banned(incoming.chat_id, incoming.user_id).await {
            return Ok(IngestOutcome::Ignored);
        }
        if let Some(text) = incoming.text.as_deref() {
            if self.dedup.is_repeat(incoming.chat_id, incoming.user_id, text) {
                tracing::debug!(
                    chat_id = incoming.chat_id,
                    user_id = incoming.user_id,
                    "Dropping repeated message"
                );
                return Ok(IngestOutcome::Duplicate);
            }
        }

        self.chats
            .upsert(
                incoming.chat_id,
                incoming.chat_title.as_deref(),
                &incoming.chat_type,
            )
            .await?;

        let inserted = self
            .store
            .save(&NewMessage {
                chat_id: incoming.chat_id,
                message_id: incoming.message_id,
                thread_id: incoming.thread_id,
                user_id: incoming.user_id,
                username: incoming.username.clone(),
                display_name: incoming.display_name.clone(),
                text: incoming.text.clone(),
                sent_at: incoming.sent_at,
                has_links: incoming.has_links,
                has_media: incoming.has_media,
                reply_to_message_id: incoming.reply_to.as_ref().map(|r| r.message_id),
                message_type: incoming.message_type.clone(),
            })
            .await?;

        if !inserted {
            return Ok(IngestOutcome::AlreadySaved);
        }

        tracing::debug!(
            chat_id = incoming.chat_id,
            message_id = incoming.message_id,
            "Message saved"
        );

        self.spawn_derivations(incoming);
        Ok(IngestOutcome::Saved)
    }

    /// Fire-and-forget derivation tasks. Each carries a top-level catch
    /// that logs; none retries (the message is persisted, work can be
    /// re-derived).
    fn spawn_derivations(&self, incoming: IncomingMessage) {
        let text_len = incoming
            .text
            .as_deref()
            .map(|t| t.trim().chars().count())
            .unwrap_or(0);

        // Alias recording for the author
        {
            let aliases = self.aliases.clone();
            let msg = incoming.clone();
            tokio::spawn(async move {
                if let Some(name) = msg.display_name.as_deref() {
                    if let Err(e) = aliases.record(msg.chat_id, msg.user_id, name, "display-name").await
                    {
                        tracing::warn!("Alias recording failed: {e}");
                    }
                }
                if let Some(username) = msg.username.as_deref() {
                    if let Err(e) = aliases.record(msg.chat_id, msg.user_id, username, "display-name").await
                    {
                        tracing::warn!("Alias recording failed: {e}");
                    }
                }
            });
        }

        // Nickname extraction from reply addressing. Only replies to
        // another user count; addressing yourself is not a nickname.
        if let (Some(reply), Some(text)) = (incoming.reply_to.clone(), incoming.text.clone()) {
            if reply.user_id != incoming.user_id {
                let aliases = self.aliases.clone();
                let chat_id = incoming.chat_id;
                tokio::spawn(async move {
                    if let Some(nick) = nickname::extract_nickname(&text) {
                        if let Err(e) =
                            aliases.record(chat_id, reply.user_id, &nick, "nickname").await
                        {
                            tracing::warn!("Nickname recording failed: {e}");
                        }
                    }
                });
            }
        }

        // Relationship extraction
        if let Some(text) = incoming.text.clone() {
            let relationships = self.relationships.clone();
            let aliases = self.aliases.clone();
            let chat_id = incoming.chat_id;
            let user_id = incoming.user_id;
            let message_id = incoming.message_id;
            tokio::spawn(async move {
                for mention in relationship::extract_relationships(&text) {
                    if let Err(e) = relationships
                        .record_mention(chat_id, user_id, &mention, message_id)
                        .await
                    {
                        tracing::warn!("Relationship recording failed: {e}");
                        continue;
                    }
                    match aliases.resolve(chat_id, &mention.person_name).await {
                        Ok(candidates) => {
                            if let Some(&related) = candidates.first() {
                                if let Err(e) = relationships
                                    .link_person(chat_id, user_id, &mention.person_name, related)
                                    .await
                                {
                                    tracing::warn!("Relationship linking failed: {e}");
                                }
                            }
                        }
                        Err(e) => tracing::warn!("Alias resolution failed: {e}"),
                    }
                }
            });
        }

        // Enqueue for fact extraction and embedding once long enough
        if text_len >= self.min_embed_length {
            let queue = self.message_queue.clone();
            let task = ProfileTask {
                chat_id: incoming.chat_id,
                user_id: incoming.user_id,
                message_id: incoming.message_id,
            };
            tokio::spawn(async move {
                if let Err(e) = queue.enqueue(&task).await {
                    tracing::warn!("Message queue enqueue failed: {e}");
                }
            });
        }

        // Long original messages additionally queue question generation
        if text_len >= QUESTION_MIN_LENGTH && incoming.message_type != "forward" {
            let queue = self.question_queue.clone();
            let task = QuestionGenTask {
                chat_id: incoming.chat_id,
                message_id: incoming.message_id,
            };
            tokio::spawn(async move {
                if let Err(e) = queue.enqueue(&task).await {
                    tracing::warn!("Question queue enqueue failed: {e}");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_chat_gate() {
        assert!(IngestPipeline::is_group_chat("group"));
        assert!(IngestPipeline::is_group_chat("supergroup"));
        assert!(!IngestPipeline::is_group_chat("private"));
        assert!(!IngestPipeline::is_group_chat("channel"));
    }
}
