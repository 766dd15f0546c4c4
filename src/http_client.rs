//! Shared HTTP client configuration
//!
//! Pre-configured reqwest clients for the external providers. Pooled
//! connections are recycled after a short idle lifetime: several providers
//! sit behind proxies that silently drop stale keep-alives.

use std::time::Duration;

/// Connect timeout in seconds (time to establish TCP connection)
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Per-attempt request timeout for embedding and rerank calls
pub const EMBEDDING_TIMEOUT_SECS: u64 = 30;

/// Request timeout for LLM completions (longer generations)
pub const LLM_TIMEOUT_SECS: u64 = 120;

/// Max idle lifetime for a pooled connection
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 30;

/// Create an HTTP client for embedding and rerank providers.
pub fn embedding_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(EMBEDDING_TIMEOUT_SECS))
        .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
        .gzip(true)
        .build()
        .expect("Failed to build HTTP client")
}

/// Create an HTTP client for LLM completion providers.
pub fn llm_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
        .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
        .gzip(true)
        .build()
        .expect("Failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        drop(embedding_client());
        drop(llm_client());
    }
}
