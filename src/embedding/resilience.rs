//! Resilient wrapper around an embedding provider
//!
//! Call path, outermost to innermost: concurrency limiter (one permit,
//! bounded FIFO of waiters) → retry with exponential backoff and jitter →
//! per-attempt timeout → circuit breaker gate around the actual HTTP call.
//! The limiter is the hard bound enforcing the provider's concurrency cap;
//! a full waiter queue rejects synchronously so callers reschedule through
//! their own queue retry instead of piling up in memory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Semaphore;

use super::{CircuitBreaker, EmbeddingProvider};
use crate::error::{Error, Result};

const MAX_WAITERS: usize = 200;
const MAX_ATTEMPTS: u32 = 5;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_MAX: Duration = Duration::from_secs(30);
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ResilientEmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    permits: Semaphore,
    waiters: AtomicUsize,
    breaker: CircuitBreaker,
}

impl ResilientEmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            permits: Semaphore::new(1),
            waiters: AtomicUsize::new(0),
            breaker: CircuitBreaker::new(),
        }
    }

    fn retry_delay(attempt: u32) -> Duration {
        let exp = RETRY_BASE.as_secs_f64() * f64::from(2u32.saturating_pow(attempt.min(20)));
        let capped = exp.min(RETRY_MAX.as_secs_f64());
        let jitter = rand::rng().random_range(0.8..=1.2);
        Duration::from_secs_f64(capped * jitter)
    }

    async fn attempt(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.breaker.is_available() {
            return Err(Error::CircuitOpen(
                "embedding provider is being throttled".into(),
            ));
        }

        let outcome = tokio::time::timeout(ATTEMPT_TIMEOUT, self.provider.embed_batch(texts)).await;

        match outcome {
            Ok(Ok(vectors)) => {
                self.breaker.record(false);
                Ok(vectors)
            }
            Ok(Err(e)) => {
                let throttled =
                    e.is_rate_limit() || matches!(&e, Error::Provider(m) if m.contains("503"));
                self.breaker.record(throttled);
                Err(e)
            }
            Err(_) => {
                self.breaker.record(false);
                Err(Error::Timeout(format!(
                    "embedding call exceeded {}s",
                    ATTEMPT_TIMEOUT.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ResilientEmbeddingClient {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.waiters.fetch_add(1, Ordering::AcqRel) >= MAX_WAITERS {
            self.waiters.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::LimiterSaturated(format!(
                "embedding limiter has {MAX_WAITERS} queued callers"
            )));
        }

        let permit = self.permits.acquire().await;
        self.waiters.fetch_sub(1, Ordering::AcqRel);
        let _permit = permit.map_err(|_| Error::Other("embedding limiter closed".into()))?;

        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let delay = Self::retry_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Embedding attempt failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Other("embedding retries exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyProvider {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            3
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(Error::RateLimited("test 429".into()));
            }
            Ok(texts.iter().map(|_| vec![0.0, 1.0, 2.0]).collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let client = ResilientEmbeddingClient::new(Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
        }));
        let vectors = client.embed_batch(&["hello".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.0, 1.0, 2.0]]);
    }

    struct BrokenProvider;

    #[async_trait]
    impl EmbeddingProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        fn dimension(&self) -> usize {
            3
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::InvalidData("bad request".into()))
        }
    }

    #[tokio::test]
    async fn test_permanent_error_does_not_retry() {
        let client = ResilientEmbeddingClient::new(Arc::new(BrokenProvider));
        let err = client.embed_batch(&["hello".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
