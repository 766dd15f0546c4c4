//! Error types for chatwarden

use thiserror::Error;

/// Main error type for chatwarden
#[derive(Debug, Error)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider-side errors (embedding, rerank, LLM)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Rate limit responses from an external provider (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Circuit breaker rejected the call without contacting the provider
    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    /// Concurrency limiter rejected the call (waiter queue full)
    #[error("Limiter saturated: {0}")]
    LimiterSaturated(String),

    /// Per-attempt timeout expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Queue could not accept more work
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Malformed payloads, unparseable LLM output, empty vectors
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Invalid user input (command arguments)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQL errors
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Reqwest HTTP client errors
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the resilience chain should retry after this error.
    ///
    /// Transient external failures (429, 408, 5xx mapped by callers,
    /// timeouts, transport errors) retry; everything else does not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RateLimited(_) | Error::Timeout(_) => true,
            Error::Provider(msg) => {
                msg.contains("408")
                    || msg.contains("502")
                    || msg.contains("503")
                    || msg.contains("504")
            }
            Error::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Whether this error came from a provider rate limit (HTTP 429).
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimited(_))
    }
}

/// Result type alias for chatwarden operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::RateLimited("429".into()).is_transient());
        assert!(Error::Timeout("30s".into()).is_transient());
        assert!(Error::Provider("upstream returned 503".into()).is_transient());
        assert!(!Error::Provider("upstream returned 400".into()).is_transient());
        assert!(!Error::InvalidData("empty vector".into()).is_transient());
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(Error::RateLimited("slow down".into()).is_rate_limit());
        assert!(!Error::Timeout("30s".into()).is_rate_limit());
    }
}
