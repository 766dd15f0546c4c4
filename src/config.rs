//! Layered configuration loaded from the environment
//!
//! `.env` is loaded by `main` before `Config::from_env` runs, so a local
//! file and real environment variables layer naturally (environment wins).
//! Unknown variables are ignored; missing required ones abort startup with
//! a diagnostic naming the variable.

use std::time::Duration;

use crate::error::{Error, Result};

/// One configured LLM provider endpoint.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub priority: i32,
    pub tags: Vec<String>,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string (required)
    pub database_url: String,
    pub max_connections: u32,

    /// Embedding provider
    pub embedding_base_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    /// Messages shorter than this are stored but never embedded
    pub min_embed_length: usize,

    /// Rerank provider (disabled when base URL is empty)
    pub rerank_base_url: String,
    pub rerank_api_key: String,
    pub rerank_model: String,
    pub rerank_enabled: bool,

    /// LLM providers, priority-ordered at load time
    pub llm_providers: Vec<ProviderConfig>,

    /// Indexing knobs
    pub index_batch_size: usize,
    pub max_batches_per_run: usize,
    pub batch_delay: Duration,
    pub idle_delay: Duration,
    pub rate_limit_pause: Duration,
    pub context_window_size: usize,
    pub questions_per_message: usize,

    /// Profile knobs
    pub profile_min_messages: i64,
    pub fact_batch_size: i64,
    pub fact_request_delay: Duration,

    /// Schedules (UTC)
    pub daily_summary_hour: u32,
    pub nightly_profile_hour: u32,

    /// Admin identity
    pub admin_user_id: i64,
    pub admin_username: String,

    /// Display timezone offset from UTC, in hours
    pub timezone_offset_hours: i32,

    /// Defaults for prompt selection
    pub default_mode: String,
    pub default_language: String,

    /// Full-text search regconfig ("simple", "russian", ...)
    pub fts_config: String,
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Configuration(format!("required environment variable {key} is not set"))
    })
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let database_url = required("DATABASE_URL")?;

        let embedding_base_url = required("EMBEDDING_BASE_URL")?;
        let embedding_api_key = var_or("EMBEDDING_API_KEY", "");
        let embedding_model = var_or("EMBEDDING_MODEL", "text-embedding-3-small");

        let rerank_base_url = var_or("RERANK_BASE_URL", "");
        let rerank_enabled = !rerank_base_url.is_empty();

        let llm_providers = Self::load_providers()?;
        if llm_providers.is_empty() {
            return Err(Error::Configuration(
                "no LLM providers configured; set LLM_PROVIDERS and LLM_<NAME>_* variables".into(),
            ));
        }

        Ok(Self {
            database_url,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),
            embedding_base_url,
            embedding_api_key,
            embedding_model,
            embedding_dim: parse_or("EMBEDDING_DIM", 1536),
            min_embed_length: parse_or("MIN_EMBED_LENGTH", 6),
            rerank_base_url,
            rerank_api_key: var_or("RERANK_API_KEY", ""),
            rerank_model: var_or("RERANK_MODEL", "bge-reranker-v2-m3"),
            rerank_enabled,
            llm_providers,
            index_batch_size: parse_or("INDEX_BATCH_SIZE", 32),
            max_batches_per_run: parse_or("MAX_BATCHES_PER_RUN", 20),
            batch_delay: Duration::from_millis(parse_or("BATCH_DELAY_MS", 500)),
            idle_delay: Duration::from_secs(parse_or("IDLE_DELAY_SECS", 30)),
            rate_limit_pause: Duration::from_secs(parse_or("RATE_LIMIT_PAUSE_SECS", 60)),
            context_window_size: parse_or("CONTEXT_WINDOW_SIZE", 10),
            questions_per_message: parse_or("QUESTIONS_PER_MESSAGE", 3),
            profile_min_messages: parse_or("PROFILE_MIN_MESSAGES", 30),
            fact_batch_size: parse_or("FACT_BATCH_SIZE", 50),
            fact_request_delay: Duration::from_millis(parse_or("FACT_REQUEST_DELAY_MS", 500)),
            daily_summary_hour: parse_or("DAILY_SUMMARY_HOUR_UTC", 18),
            nightly_profile_hour: parse_or("NIGHTLY_PROFILE_HOUR_UTC", 2),
            admin_user_id: parse_or("ADMIN_USER_ID", 0),
            admin_username: var_or("ADMIN_USERNAME", ""),
            timezone_offset_hours: parse_or("TIMEZONE_OFFSET_HOURS", 3),
            default_mode: var_or("DEFAULT_MODE", "sarcastic"),
            default_language: var_or("DEFAULT_LANGUAGE", "ru"),
            fts_config: var_or("FTS_CONFIG", "simple"),
        })
    }

    /// Parse `LLM_PROVIDERS` (comma-separated names) plus per-provider
    /// `LLM_<NAME>_URL/KEY/MODEL/PRIORITY/TAGS` variables.
    fn load_providers() -> Result<Vec<ProviderConfig>> {
        let names = var_or("LLM_PROVIDERS", "");
        let mut providers = Vec::new();

        for name in names.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let upper = name.to_uppercase().replace('-', "_");
            let base_url = required(&format!("LLM_{upper}_URL"))?;
            let api_key = var_or(&format!("LLM_{upper}_KEY"), "");
            let model = required(&format!("LLM_{upper}_MODEL"))?;
            let priority = parse_or(&format!("LLM_{upper}_PRIORITY"), 100);
            let tags = var_or(&format!("LLM_{upper}_TAGS"), "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();

            providers.push(ProviderConfig {
                name: name.to_string(),
                base_url,
                api_key,
                model,
                priority,
                tags,
            });
        }

        providers.sort_by_key(|p| p.priority);
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_minimal_env() {
        std::env::set_var("DATABASE_URL", "postgresql://localhost/chatwarden_test");
        std::env::set_var("EMBEDDING_BASE_URL", "http://localhost:8080");
        std::env::set_var("LLM_PROVIDERS", "main");
        std::env::set_var("LLM_MAIN_URL", "http://localhost:8081");
        std::env::set_var("LLM_MAIN_MODEL", "gpt-4o-mini");
    }

    #[test]
    #[serial]
    fn test_missing_database_url_fails() {
        std::env::remove_var("DATABASE_URL");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    #[serial]
    fn test_minimal_config_loads_with_defaults() {
        set_minimal_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.embedding_dim, 1536);
        assert_eq!(config.min_embed_length, 6);
        assert_eq!(config.context_window_size, 10);
        assert_eq!(config.llm_providers.len(), 1);
        assert_eq!(config.llm_providers[0].name, "main");
    }

    #[test]
    #[serial]
    fn test_providers_sorted_by_priority() {
        set_minimal_env();
        std::env::set_var("LLM_PROVIDERS", "main, backup");
        std::env::set_var("LLM_MAIN_PRIORITY", "50");
        std::env::set_var("LLM_BACKUP_URL", "http://localhost:8082");
        std::env::set_var("LLM_BACKUP_MODEL", "gemini-flash");
        std::env::set_var("LLM_BACKUP_PRIORITY", "10");
        std::env::set_var("LLM_BACKUP_TAGS", "factcheck, uncensored");

        let config = Config::from_env().unwrap();
        assert_eq!(config.llm_providers[0].name, "backup");
        assert_eq!(config.llm_providers[0].tags, vec!["factcheck", "uncensored"]);

        std::env::remove_var("LLM_MAIN_PRIORITY");
        std::env::set_var("LLM_PROVIDERS", "main");
    }
}
