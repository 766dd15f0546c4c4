//! First-stage candidate gathering: vector kNN plus lexical full-text
//!
//! All three embedding tables are searchable; the strategy layer decides
//! which ones a query hits. Scores are cosine similarities in [0, 1] for
//! vector hits and normalised ts_rank for lexical hits.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::database::format_vector;
use crate::error::Result;

/// Vector candidates fetched per query variant.
pub const VECTOR_TOP_K: i64 = 20;

/// Lexical candidates fetched per query variant.
pub const LEXICAL_TOP_L: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    Message,
    ContextWindow,
    Question,
}

/// One retrieval candidate. For context windows `message_id` is the
/// window's start message id.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub author: Option<String>,
    pub author_user_id: Option<i64>,
    pub sent_at: Option<DateTime<Utc>>,
    pub score: f32,
    pub lexical: bool,
    pub source: CandidateSource,
}

#[derive(Clone)]
pub struct HybridSearcher {
    pool: PgPool,
    fts_config: String,
}

type MessageHitRow = (i64, String, i64, Option<String>, Option<String>, DateTime<Utc>, f64);

impl HybridSearcher {
    pub fn new(pool: PgPool, fts_config: &str) -> Self {
        Self {
            pool,
            fts_config: fts_config.to_string(),
        }
    }

    fn message_candidate(chat_id: i64, row: MessageHitRow, lexical: bool, source: CandidateSource) -> Candidate {
        let (message_id, text, user_id, display_name, username, sent_at, score) = row;
        Candidate {
            chat_id,
            message_id,
            text,
            author: display_name.or(username),
            author_user_id: Some(user_id),
            sent_at: Some(sent_at),
            score: score as f32,
            lexical,
            source,
        }
    }

    /// Vector kNN over per-message embeddings, optionally filtered to a
    /// set of authors (the personal strategy).
    pub async fn search_messages(
        &self,
        chat_id: i64,
        query_vector: &[f32],
        limit: i64,
        authors: Option<&[i64]>,
    ) -> Result<Vec<Candidate>> {
        let author_filter = if authors.is_some() {
            "AND m.user_id = ANY($4)"
        } else {
            ""
        };
        let sql = format!(
            "SELECT e.message_id, e.chunk_text, m.user_id, m.display_name, m.username,
                    m.sent_at, 1 - (e.embedding <=> $2::vector) AS score
             FROM message_embeddings e
             JOIN messages m ON m.chat_id = e.chat_id AND m.message_id = e.message_id
             WHERE e.chat_id = $1 {author_filter}
             ORDER BY e.embedding <=> $2::vector
             LIMIT $3"
        );

        let mut query = sqlx::query_as::<_, MessageHitRow>(&sql)
            .bind(chat_id)
            .bind(format_vector(query_vector))
            .bind(limit);
        if let Some(authors) = authors {
            query = query.bind(authors);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| Self::message_candidate(chat_id, row, false, CandidateSource::Message))
            .collect())
    }

    /// Vector kNN over sliding-window context embeddings.
    pub async fn search_contexts(
        &self,
        chat_id: i64,
        query_vector: &[f32],
        limit: i64,
    ) -> Result<Vec<Candidate>> {
        let rows = sqlx::query_as::<_, (i64, String, f64)>(
            "SELECT start_message_id, window_text,
                    1 - (embedding <=> $2::vector) AS score
             FROM context_embeddings
             WHERE chat_id = $1
             ORDER BY embedding <=> $2::vector
             LIMIT $3",
        )
        .bind(chat_id)
        .bind(format_vector(query_vector))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(start_id, text, score)| Candidate {
                chat_id,
                message_id: start_id,
                text,
                author: None,
                author_user_id: None,
                sent_at: None,
                score: score as f32,
                lexical: false,
                source: CandidateSource::ContextWindow,
            })
            .collect())
    }

    /// Vector kNN over generated-question embeddings (the Q→A bridge).
    /// Candidates carry the source message's text, so they collapse with
    /// direct message hits on the same id.
    pub async fn search_questions(
        &self,
        chat_id: i64,
        query_vector: &[f32],
        limit: i64,
    ) -> Result<Vec<Candidate>> {
        let rows = sqlx::query_as::<_, MessageHitRow>(
            "SELECT q.message_id, coalesce(m.text, ''), m.user_id, m.display_name,
                    m.username, m.sent_at, 1 - (q.embedding <=> $2::vector) AS score
             FROM question_embeddings q
             JOIN messages m ON m.chat_id = q.chat_id AND m.message_id = q.message_id
             WHERE q.chat_id = $1
             ORDER BY q.embedding <=> $2::vector
             LIMIT $3",
        )
        .bind(chat_id)
        .bind(format_vector(query_vector))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // Several questions can point at one message; keep the best hit.
        let mut seen = std::collections::HashSet::new();
        let mut candidates = Vec::new();
        for row in rows {
            if seen.insert(row.0) {
                candidates.push(Self::message_candidate(
                    chat_id,
                    row,
                    false,
                    CandidateSource::Question,
                ));
            }
        }
        Ok(candidates)
    }

    /// Full-text lexical search over raw messages.
    pub async fn search_lexical(
        &self,
        chat_id: i64,
        query: &str,
        limit: i64,
        authors: Option<&[i64]>,
    ) -> Result<Vec<Candidate>> {
        let author_filter = if authors.is_some() {
            "AND m.user_id = ANY($5)"
        } else {
            ""
        };
        let sql = format!(
            "SELECT m.message_id, coalesce(m.text, ''), m.user_id, m.display_name,
                    m.username, m.sent_at,
                    ts_rank(to_tsvector($4::regconfig, coalesce(m.text, '')),
                            websearch_to_tsquery($4::regconfig, $2))::float8 AS score
             FROM messages m
             WHERE m.chat_id = $1
               AND to_tsvector($4::regconfig, coalesce(m.text, ''))
                   @@ websearch_to_tsquery($4::regconfig, $2)
             {author_filter}
             ORDER BY score DESC
             LIMIT $3"
        );

        let mut db_query = sqlx::query_as::<_, MessageHitRow>(&sql)
            .bind(chat_id)
            .bind(query)
            .bind(limit)
            .bind(&self.fts_config);
        if let Some(authors) = authors {
            db_query = db_query.bind(authors);
        }

        let rows = match db_query.fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                // websearch_to_tsquery rejects some exotic input; lexical
                // search is best-effort on top of the vector stage.
                tracing::warn!("Lexical search failed: {e}");
                return Ok(Vec::new());
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| {
                let mut candidate =
                    Self::message_candidate(chat_id, row, true, CandidateSource::Message);
                // ts_rank is unbounded-ish; clamp into the similarity scale.
                candidate.score = candidate.score.min(1.0);
                candidate
            })
            .collect())
    }
}
