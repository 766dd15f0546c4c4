//! Lease-based queue operations
//!
//! A row is "ready" iff `processed = false ∧ next_run_at ≤ now ∧
//! (picked_at is null ∨ picked_at < now − lease) ∧ attempt_count < max`.
//! Picking is one atomic UPDATE over a `FOR UPDATE SKIP LOCKED` subselect,
//! so concurrent workers never contend on the same row.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;

use super::{QueueConfig, QueueMetrics};
use crate::error::{Error, Result};

/// A leased queue row.
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    pub id: i64,
    pub payload: T,
    pub created_at: DateTime<Utc>,
    pub attempt_count: i32,
}

/// Aggregate queue counts for dashboards and the admin status command.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub queue: String,
    pub ready: i64,
    pub scheduled: i64,
    pub in_flight: i64,
    pub completed: i64,
    pub dead: i64,
    pub avg_wait_ms: f64,
    pub avg_processing_ms: f64,
}

/// Untyped queue operations over one table.
#[derive(Clone)]
pub struct QueueService {
    pool: PgPool,
    config: QueueConfig,
    metrics: Arc<QueueMetrics>,
}

fn chrono_duration(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(300))
}

/// Retry delay: `min(base · 2^(attempts−1), max) · (1 ± 0.2)`.
pub fn backoff_delay(
    config: &QueueConfig,
    attempts: i32,
    jitter: f64,
) -> std::time::Duration {
    let exponent = attempts.saturating_sub(1).min(20) as u32;
    let base = config.base_retry_delay.as_secs_f64() * f64::from(2u32.saturating_pow(exponent));
    let capped = base.min(config.max_retry_delay.as_secs_f64());
    let jittered = capped * (1.0 + jitter.clamp(-0.2, 0.2));
    std::time::Duration::from_secs_f64(jittered.max(0.0))
}

impl QueueService {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self {
            pool,
            config,
            metrics: QueueMetrics::shared(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    /// Insert a payload and notify the queue channel with the new row id.
    ///
    /// Rejects with `QueueFull` when the pending backlog has reached the
    /// configured capacity, so producers can tell users to retry instead
    /// of silently growing the table.
    pub async fn enqueue(&self, payload: &serde_json::Value) -> Result<i64> {
        let pending = self.pending_count().await?;
        if pending >= self.config.capacity {
            return Err(Error::QueueFull(format!(
                "{} has {pending} pending entries (capacity {})",
                self.config.queue_name, self.config.capacity
            )));
        }

        let id = sqlx::query_scalar::<_, i64>(&format!(
            "INSERT INTO {} (payload) VALUES ($1) RETURNING id",
            self.config.table
        ))
        .bind(payload.clone())
        .fetch_one(&self.pool)
        .await?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(self.config.channel())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    /// Atomically lease one ready row. Transient store errors are logged
    /// and reported as an empty pick so worker loops keep running.
    pub async fn pick(&self) -> Result<Option<QueueItem<serde_json::Value>>> {
        let lease_cutoff = Utc::now() - chrono_duration(self.config.lease_timeout);

        let sql = format!(
            "UPDATE {table}
             SET picked_at = now(), started_at = now(), attempt_count = attempt_count + 1
             WHERE id = (
                 SELECT id FROM {table}
                 WHERE processed = FALSE
                   AND next_run_at <= now()
                   AND (picked_at IS NULL OR picked_at < $1)
                   AND attempt_count < $2
                 ORDER BY next_run_at ASC
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
             RETURNING id, payload, created_at, attempt_count",
            table = self.config.table
        );

        let row = match sqlx::query_as::<_, (i64, serde_json::Value, DateTime<Utc>, i32)>(&sql)
            .bind(lease_cutoff)
            .bind(self.config.max_attempts)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("Pick from {} failed: {e}", self.config.queue_name);
                return Ok(None);
            }
        };

        Ok(row.map(|(id, payload, created_at, attempt_count)| {
            self.metrics.record_pick();
            QueueItem {
                id,
                payload,
                created_at,
                attempt_count,
            }
        }))
    }

    /// Mark a row processed. Clears the lease and any error text left by
    /// earlier failed attempts, and records wait/processing durations.
    pub async fn complete(&self, id: i64, created_at: DateTime<Utc>) -> Result<()> {
        let sql = format!(
            "UPDATE {}
             SET processed = TRUE, completed_at = now(), picked_at = NULL, last_error = NULL
             WHERE id = $1
             RETURNING started_at, completed_at",
            self.config.table
        );

        let row = sqlx::query_as::<_, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some((Some(started), Some(completed))) = row {
            let wait_ms = (started - created_at).num_milliseconds().max(0) as f64;
            let proc_ms = (completed - started).num_milliseconds().max(0) as f64;
            self.metrics.record_complete(wait_ms, proc_ms);
            tracing::debug!(
                queue = self.config.queue_name,
                id,
                wait_ms,
                proc_ms,
                "Queue entry completed"
            );
        }

        Ok(())
    }

    /// Record a failed attempt. Schedules a retry with exponential backoff
    /// and jitter, or dead-letters the row once attempts are exhausted.
    pub async fn fail(&self, id: i64, attempts: i32, error: &str) -> Result<()> {
        if attempts >= self.config.max_attempts {
            let sql = format!(
                "UPDATE {}
                 SET processed = TRUE, completed_at = now(), picked_at = NULL,
                     last_error = $2
                 WHERE id = $1",
                self.config.table
            );
            sqlx::query(&sql)
                .bind(id)
                .bind(format!("[DEAD] {error}"))
                .execute(&self.pool)
                .await?;

            self.metrics.record_dead_letter();
            tracing::error!(
                queue = self.config.queue_name,
                id,
                attempts,
                "Queue entry dead-lettered: {error}"
            );
            return Ok(());
        }

        let jitter = rand::rng().random_range(-0.2..=0.2);
        let delay = backoff_delay(&self.config, attempts, jitter);
        let next_run_at = Utc::now() + chrono_duration(delay);

        let sql = format!(
            "UPDATE {}
             SET picked_at = NULL, next_run_at = $2, last_error = $3
             WHERE id = $1",
            self.config.table
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(next_run_at)
            .bind(error)
            .execute(&self.pool)
            .await?;

        self.metrics.record_retry();
        tracing::warn!(
            queue = self.config.queue_name,
            id,
            attempts,
            retry_in_secs = delay.as_secs(),
            "Queue entry failed, retry scheduled: {error}"
        );
        Ok(())
    }

    /// Reclaim rows whose lease expired.
    ///
    /// Rows with attempts left become ready again immediately; rows that
    /// crashed on their final attempt are dead-lettered.
    pub async fn recover_stale(&self) -> Result<(u64, u64)> {
        let lease_cutoff = Utc::now() - chrono_duration(self.config.lease_timeout);

        let requeue_sql = format!(
            "UPDATE {}
             SET picked_at = NULL, next_run_at = now(),
                 last_error = COALESCE(last_error || ' ', '') || '[STALE]'
             WHERE processed = FALSE
               AND picked_at IS NOT NULL
               AND picked_at < $1
               AND attempt_count < $2",
            self.config.table
        );
        let requeued = sqlx::query(&requeue_sql)
            .bind(lease_cutoff)
            .bind(self.config.max_attempts)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let dead_sql = format!(
            "UPDATE {}
             SET processed = TRUE, completed_at = now(), picked_at = NULL,
                 last_error = '[DEAD] crashed on final attempt: '
                              || COALESCE(last_error, 'no error recorded')
             WHERE processed = FALSE
               AND picked_at IS NOT NULL
               AND picked_at < $1
               AND attempt_count >= $2",
            self.config.table
        );
        let dead = sqlx::query(&dead_sql)
            .bind(lease_cutoff)
            .bind(self.config.max_attempts)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if requeued > 0 || dead > 0 {
            self.metrics.record_stale(requeued);
            for _ in 0..dead {
                self.metrics.record_dead_letter();
            }
            tracing::warn!(
                queue = self.config.queue_name,
                requeued,
                dead,
                "Stale lease sweep reclaimed entries"
            );
        }

        Ok((requeued, dead))
    }

    /// Unprocessed rows not currently under a valid lease.
    pub async fn pending_count(&self) -> Result<i64> {
        let lease_cutoff = Utc::now() - chrono_duration(self.config.lease_timeout);
        let sql = format!(
            "SELECT COUNT(*) FROM {}
             WHERE processed = FALSE
               AND (picked_at IS NULL OR picked_at < $1)",
            self.config.table
        );
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(lease_cutoff)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Aggregate counts plus latency averages.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let sql = format!(
            "SELECT
                COUNT(*) FILTER (WHERE processed = FALSE AND picked_at IS NULL
                                 AND next_run_at <= now()) AS ready,
                COUNT(*) FILTER (WHERE processed = FALSE AND next_run_at > now()) AS scheduled,
                COUNT(*) FILTER (WHERE processed = FALSE AND picked_at IS NOT NULL) AS in_flight,
                COUNT(*) FILTER (WHERE processed = TRUE AND last_error IS NULL) AS completed,
                COUNT(*) FILTER (WHERE processed = TRUE AND last_error LIKE '[DEAD]%') AS dead
             FROM {}",
            self.config.table
        );
        let (ready, scheduled, in_flight, completed, dead) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(&sql)
                .fetch_one(&self.pool)
                .await?;

        Ok(DashboardStats {
            queue: self.config.queue_name.to_string(),
            ready,
            scheduled,
            in_flight,
            completed,
            dead,
            avg_wait_ms: self.metrics.avg_wait_ms.get(),
            avg_processing_ms: self.metrics.avg_processing_ms.get(),
        })
    }

    /// Remove processed rows older than the retention window.
    pub async fn cleanup(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono_duration(self.config.retention);
        let sql = format!(
            "DELETE FROM {} WHERE processed = TRUE AND completed_at < $1",
            self.config.table
        );
        let removed = sqlx::query(&sql)
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed > 0 {
            tracing::info!(
                queue = self.config.queue_name,
                removed,
                "Queue cleanup removed old entries"
            );
        }
        Ok(removed)
    }
}

/// Typed facade binding one payload type to a queue.
#[derive(Clone)]
pub struct TypedQueue<T> {
    inner: QueueService,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> TypedQueue<T> {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self {
            inner: QueueService::new(pool, config),
            _payload: PhantomData,
        }
    }

    pub fn service(&self) -> &QueueService {
        &self.inner
    }

    pub async fn enqueue(&self, payload: &T) -> Result<i64> {
        let value = serde_json::to_value(payload)?;
        self.inner.enqueue(&value).await
    }

    /// Pick and decode one entry. A malformed payload is a data error,
    /// not a transient one: the row is dead-lettered instead of retried.
    pub async fn pick(&self) -> Result<Option<QueueItem<T>>> {
        let Some(raw) = self.inner.pick().await? else {
            return Ok(None);
        };

        match serde_json::from_value::<T>(raw.payload.clone()) {
            Ok(payload) => Ok(Some(QueueItem {
                id: raw.id,
                payload,
                created_at: raw.created_at,
                attempt_count: raw.attempt_count,
            })),
            Err(e) => {
                tracing::warn!(
                    queue = self.inner.config.queue_name,
                    id = raw.id,
                    "Malformed queue payload: {e}"
                );
                self.inner
                    .fail(raw.id, self.inner.config.max_attempts, &format!("malformed payload: {e}"))
                    .await?;
                Ok(None)
            }
        }
    }

    pub async fn complete(&self, id: i64, created_at: DateTime<Utc>) -> Result<()> {
        self.inner.complete(id, created_at).await
    }

    pub async fn fail(&self, id: i64, attempts: i32, error: &str) -> Result<()> {
        self.inner.fail(id, attempts, error).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> QueueConfig {
        QueueConfig {
            table: "ask_queue",
            queue_name: "ask",
            max_attempts: 5,
            base_retry_delay: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(600),
            lease_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(86400),
            capacity: 100,
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = test_config();
        assert_eq!(backoff_delay(&config, 1, 0.0), Duration::from_secs(30));
        assert_eq!(backoff_delay(&config, 2, 0.0), Duration::from_secs(60));
        assert_eq!(backoff_delay(&config, 3, 0.0), Duration::from_secs(120));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let config = test_config();
        assert_eq!(backoff_delay(&config, 10, 0.0), Duration::from_secs(600));
        // Huge attempt counts must not overflow
        assert_eq!(backoff_delay(&config, i32::MAX, 0.0), Duration::from_secs(600));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let config = test_config();
        let low = backoff_delay(&config, 1, -0.2);
        let high = backoff_delay(&config, 1, 0.2);
        assert_eq!(low, Duration::from_secs(24));
        assert_eq!(high, Duration::from_secs(36));
        // Out-of-range jitter is clamped
        assert_eq!(backoff_delay(&config, 1, 5.0), high);
    }
}
