//! Idempotent schema DDL
//!
//! One table per entity, one table per queue. The vector dimension and the
//! full-text regconfig are deployment-fixed, so the statements are built at
//! startup rather than kept as static SQL files.

/// Logical queue tables. Each gets identical bookkeeping columns plus a
/// JSONB payload; the notify channel is `<table>_channel`.
pub const QUEUE_TABLES: [&str; 5] = [
    "ask_queue",
    "summary_queue",
    "truth_queue",
    "message_queue",
    "question_generation_queue",
];

fn queue_ddl(table: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                picked_at TIMESTAMPTZ,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                attempt_count INT NOT NULL DEFAULT 0,
                next_run_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                last_error TEXT
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_ready
             ON {table} (next_run_at) WHERE processed = FALSE"
        ),
    ]
}

/// All schema statements, in execution order.
pub fn statements(embedding_dim: usize, fts_config: &str) -> Vec<String> {
    let mut ddl: Vec<String> = vec![
        "CREATE EXTENSION IF NOT EXISTS vector".into(),
        // --- messages ---
        "CREATE TABLE IF NOT EXISTS messages (
            chat_id BIGINT NOT NULL,
            message_id BIGINT NOT NULL,
            thread_id BIGINT,
            user_id BIGINT NOT NULL,
            username TEXT,
            display_name TEXT,
            text TEXT,
            sent_at TIMESTAMPTZ NOT NULL,
            has_links BOOLEAN NOT NULL DEFAULT FALSE,
            has_media BOOLEAN NOT NULL DEFAULT FALSE,
            reply_to_message_id BIGINT,
            message_type TEXT NOT NULL DEFAULT 'text',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (chat_id, message_id)
        )"
        .into(),
        "CREATE INDEX IF NOT EXISTS idx_messages_chat_sent ON messages (chat_id, sent_at)".into(),
        "CREATE INDEX IF NOT EXISTS idx_messages_chat_user ON messages (chat_id, user_id)".into(),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_messages_fts
             ON messages USING GIN (to_tsvector('{fts_config}', coalesce(text, '')))"
        ),
        // --- chats ---
        "CREATE TABLE IF NOT EXISTS chats (
            chat_id BIGINT PRIMARY KEY,
            title TEXT,
            chat_type TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            deactivated_reason TEXT,
            deactivated_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
        .into(),
        // --- embeddings ---
        format!(
            "CREATE TABLE IF NOT EXISTS message_embeddings (
                chat_id BIGINT NOT NULL,
                message_id BIGINT NOT NULL,
                chunk_index INT NOT NULL DEFAULT 0,
                chunk_text TEXT NOT NULL,
                embedding vector({embedding_dim}) NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (chat_id, message_id, chunk_index)
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_message_embeddings_vec
         ON message_embeddings USING hnsw (embedding vector_cosine_ops)"
            .into(),
        format!(
            "CREATE TABLE IF NOT EXISTS context_embeddings (
                chat_id BIGINT NOT NULL,
                start_message_id BIGINT NOT NULL,
                window_text TEXT NOT NULL,
                embedding vector({embedding_dim}) NOT NULL,
                member_message_ids BIGINT[] NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (chat_id, start_message_id)
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_context_embeddings_vec
         ON context_embeddings USING hnsw (embedding vector_cosine_ops)"
            .into(),
        format!(
            "CREATE TABLE IF NOT EXISTS question_embeddings (
                chat_id BIGINT NOT NULL,
                message_id BIGINT NOT NULL,
                question_index INT NOT NULL,
                question_text TEXT NOT NULL,
                embedding vector({embedding_dim}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (chat_id, message_id, question_index)
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_question_embeddings_vec
         ON question_embeddings USING hnsw (embedding vector_cosine_ops)"
            .into(),
        // --- profile & memory ---
        "CREATE TABLE IF NOT EXISTS user_profiles (
            chat_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            display_name TEXT,
            message_count BIGINT NOT NULL DEFAULT 0,
            activity_hours JSONB NOT NULL DEFAULT '{}',
            summary TEXT,
            communication_style TEXT,
            role_label TEXT,
            interests JSONB NOT NULL DEFAULT '[]',
            traits JSONB NOT NULL DEFAULT '[]',
            roast_material JSONB NOT NULL DEFAULT '[]',
            gender TEXT,
            gender_confidence REAL NOT NULL DEFAULT 0,
            profile_version INT NOT NULL DEFAULT 0,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (chat_id, user_id)
        )"
        .into(),
        "CREATE TABLE IF NOT EXISTS user_facts (
            chat_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            fact_text TEXT NOT NULL,
            fact_type TEXT NOT NULL,
            confidence REAL NOT NULL,
            source_message_ids BIGINT[] NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (chat_id, user_id, fact_text)
        )"
        .into(),
        "CREATE TABLE IF NOT EXISTS user_aliases (
            chat_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            alias TEXT NOT NULL,
            alias_type TEXT NOT NULL,
            usage_count INT NOT NULL DEFAULT 1,
            first_seen TIMESTAMPTZ NOT NULL DEFAULT now(),
            last_seen TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (chat_id, user_id, alias)
        )"
        .into(),
        "CREATE INDEX IF NOT EXISTS idx_user_aliases_lookup
         ON user_aliases (chat_id, lower(alias))"
            .into(),
        "CREATE TABLE IF NOT EXISTS user_relationships (
            id BIGSERIAL PRIMARY KEY,
            chat_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            person_name TEXT NOT NULL,
            related_user_id BIGINT,
            relationship_type TEXT NOT NULL,
            surface_label TEXT NOT NULL,
            confidence REAL NOT NULL,
            mention_count INT NOT NULL DEFAULT 1,
            source_message_ids BIGINT[] NOT NULL DEFAULT '{}',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            first_seen TIMESTAMPTZ NOT NULL DEFAULT now(),
            last_seen TIMESTAMPTZ NOT NULL DEFAULT now(),
            ended_at TIMESTAMPTZ,
            ended_reason TEXT,
            UNIQUE (chat_id, user_id, person_name, relationship_type)
        )"
        .into(),
        "CREATE TABLE IF NOT EXISTS banned_users (
            chat_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            reason TEXT,
            banned_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (chat_id, user_id)
        )"
        .into(),
        "CREATE TABLE IF NOT EXISTS chat_settings (
            chat_id BIGINT PRIMARY KEY,
            mode TEXT,
            language TEXT,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
        .into(),
        "CREATE TABLE IF NOT EXISTS prompt_settings (
            key TEXT PRIMARY KEY,
            prompt TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
        .into(),
        "CREATE TABLE IF NOT EXISTS admin_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
        .into(),
        "CREATE TABLE IF NOT EXISTS conversation_memory (
            id BIGSERIAL PRIMARY KEY,
            chat_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
        .into(),
        "CREATE INDEX IF NOT EXISTS idx_conversation_memory_user
         ON conversation_memory (chat_id, user_id, created_at DESC)"
            .into(),
    ];

    for table in QUEUE_TABLES {
        ddl.extend(queue_ddl(table));
    }

    ddl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_cover_all_queues() {
        let ddl = statements(1536, "simple").join("\n");
        for table in QUEUE_TABLES {
            assert!(ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
    }

    #[test]
    fn test_dimension_is_injected() {
        let ddl = statements(768, "russian").join("\n");
        assert!(ddl.contains("vector(768)"));
        assert!(ddl.contains("to_tsvector('russian'"));
        assert!(!ddl.contains("vector(1536)"));
    }

    #[test]
    fn test_all_statements_idempotent() {
        for stmt in statements(1536, "simple") {
            assert!(
                stmt.contains("IF NOT EXISTS"),
                "non-idempotent statement: {stmt}"
            );
        }
    }
}
