//! Database module for PostgreSQL operations

pub mod schema;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::error::{Error, Result};

/// Database connection and operations
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool (lazy; no I/O here)
    pub fn new(postgres_url: &str, max_connections: u32) -> Result<Self> {
        tracing::info!("Database pool max connections: {}", max_connections);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(postgres_url)?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Initialize the database: verify connectivity, create the vector
    /// extension, all tables and indexes. Every statement is idempotent,
    /// so this is safe to run on every startup before workers spawn.
    pub async fn initialize(&self, embedding_dim: usize, fts_config: &str) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect: {e}")))?;

        for statement in schema::statements(embedding_dim, fts_config) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Database(format!("Schema statement failed: {e}\n{statement}")))?;
        }

        tracing::info!("Database schema ready (embedding dim {})", embedding_dim);
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                is_healthy: true,
                message: "Connected".to_string(),
            }),
            Err(e) => Ok(HealthStatus {
                is_healthy: false,
                message: format!("Connection failed: {e}"),
            }),
        }
    }
}

/// Health status for database
#[derive(Debug)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub message: String,
}

/// Format an embedding for a pgvector literal: `[0.1,0.2,...]`.
///
/// Bound as text and cast with `::vector` in SQL.
pub fn format_vector(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_creation() {
        let result = Database::new("postgresql://localhost/test", 5);
        assert!(result.is_ok());
    }

    #[test]
    fn test_format_vector() {
        assert_eq!(format_vector(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
        assert_eq!(format_vector(&[]), "[]");
    }
}
