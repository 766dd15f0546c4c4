//! Shared test fixture
//!
//! Integration tests need a PostgreSQL instance with the pgvector
//! extension. They are skipped unless TEST_DATABASE_URL is set, so the
//! suite stays green on machines without a database.

use chatwarden::database::Database;
use sqlx::PgPool;

pub const TEST_EMBEDDING_DIM: usize = 8;

pub struct TestFixture {
    pub db: Database,
}

impl TestFixture {
    /// Connect and initialise the schema. `None` when TEST_DATABASE_URL
    /// is not set.
    pub async fn new() -> Option<Self> {
        let _ = dotenv::dotenv();
        let url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("skipping: TEST_DATABASE_URL not set");
                return None;
            }
        };

        let db = Database::new(&url, 5).expect("pool creation");
        db.initialize(TEST_EMBEDDING_DIM, "simple")
            .await
            .expect("schema initialisation");

        Some(Self { db })
    }

    pub fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    /// Unique negative chat id per test run, Telegram-group style.
    pub fn unique_chat_id() -> i64 {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock before epoch")
            .subsec_nanos() as i64;
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock before epoch")
            .as_secs() as i64;
        -(1_000_000_000 + (secs % 1_000_000) * 1_000 + (nanos % 1_000))
    }
}
