//! Prompt registry keyed by `command:mode:language`
//!
//! Lookup falls back `command:mode:language` → `command:mode` → `command`.
//! Built-in defaults cover every command; the full production catalogue is
//! maintained in the prompt_settings table and overrides any key at
//! runtime.

use std::collections::HashMap;
use std::sync::RwLock;

use sqlx::PgPool;

use crate::error::Result;

pub struct PromptRegistry {
    prompts: RwLock<HashMap<String, String>>,
}

impl PromptRegistry {
    /// Registry with built-in defaults.
    pub fn with_defaults() -> Self {
        let mut prompts = HashMap::new();

        prompts.insert(
            "ask".to_string(),
            "You are a group-chat assistant. Answer the question using only \
             the provided chat context and memory facts. If the context does \
             not contain the answer, say so plainly."
                .to_string(),
        );
        prompts.insert(
            "ask:sarcastic:ru".to_string(),
            "Ты — саркастичный бот группового чата. Отвечай на вопрос, \
             опираясь только на приведённый контекст переписки и факты. \
             Если ответа в контексте нет, так и скажи."
                .to_string(),
        );
        prompts.insert(
            "smart".to_string(),
            "You are a knowledgeable assistant. Answer the question directly \
             and concisely using your own knowledge."
                .to_string(),
        );
        prompts.insert(
            "summary".to_string(),
            "Summarise the following group-chat messages: main topics, who \
             said what, notable moments. Be concise."
                .to_string(),
        );
        prompts.insert(
            "truth".to_string(),
            "Fact-check each of the following chat messages. For every \
             claim, state whether it is accurate, questionable or false, \
             with one line of reasoning."
                .to_string(),
        );
        prompts.insert(
            "intent".to_string(),
            "Classify the retrieval intent of a chat question. Respond with \
             strict JSON: {\"intent\": \"personal|contextual|general\", \
             \"people\": [], \"entities\": [], \"temporal\": null, \
             \"temporal_days\": null, \"confidence\": 0.0}"
                .to_string(),
        );
        prompts.insert(
            "fusion".to_string(),
            "Rewrite the user question as 3-5 diverse search queries \
             (paraphrases and sub-questions). Respond with strict JSON: \
             {\"queries\": [\"...\"]}"
                .to_string(),
        );
        prompts.insert(
            "questions".to_string(),
            "Generate up to {count} short hypothetical questions that the \
             following chat message answers. Respond with strict JSON: \
             {\"questions\": [\"...\"]}"
                .to_string(),
        );
        prompts.insert(
            "facts".to_string(),
            "Extract durable facts about the author from these chat \
             messages. Respond with strict JSON: {\"facts\": [{\"text\": \
             \"...\", \"type\": \"likes|dislikes|said|does|knows|opinion\", \
             \"confidence\": 0.0}]}"
                .to_string(),
        );
        prompts.insert(
            "profile".to_string(),
            "Build a profile of this chat member from their messages and \
             known facts. Respond with strict JSON: {\"summary\": \"...\", \
             \"communication_style\": \"...\", \"role\": \"...\", \
             \"interests\": [], \"traits\": [], \"roast_material\": []}"
                .to_string(),
        );

        Self {
            prompts: RwLock::new(prompts),
        }
    }

    /// Resolve a prompt for (command, mode, language).
    pub fn resolve(&self, command: &str, mode: &str, language: &str) -> Option<String> {
        let prompts = self.prompts.read().ok()?;
        for key in [
            format!("{command}:{mode}:{language}"),
            format!("{command}:{mode}"),
            command.to_string(),
        ] {
            if let Some(prompt) = prompts.get(&key) {
                return Some(prompt.clone());
            }
        }
        None
    }

    /// Set or replace one key in memory.
    pub fn set(&self, key: &str, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.write() {
            prompts.insert(key.to_string(), prompt.to_string());
        }
    }

    /// Apply persisted overrides on top of the defaults.
    pub async fn load_overrides(&self, pool: &PgPool) -> Result<usize> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT key, prompt FROM prompt_settings")
            .fetch_all(pool)
            .await?;

        let count = rows.len();
        if let Ok(mut prompts) = self.prompts.write() {
            for (key, prompt) in rows {
                prompts.insert(key, prompt);
            }
        }

        if count > 0 {
            tracing::info!("Loaded {count} prompt overrides");
        }
        Ok(count)
    }

    /// Persist an override and apply it in memory.
    pub async fn store_override(&self, pool: &PgPool, key: &str, prompt: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO prompt_settings (key, prompt) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET prompt = EXCLUDED.prompt, updated_at = now()",
        )
        .bind(key)
        .bind(prompt)
        .execute(pool)
        .await?;

        self.set(key, prompt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_chain() {
        let registry = PromptRegistry::with_defaults();

        // Exact key wins
        let exact = registry.resolve("ask", "sarcastic", "ru").unwrap();
        assert!(exact.contains("саркастичный"));

        // Unknown language falls back to command:mode, then command
        let fallback = registry.resolve("ask", "sarcastic", "de").unwrap();
        assert!(fallback.contains("саркастичный") || fallback.contains("group-chat"));

        // Unknown mode falls back to bare command
        let bare = registry.resolve("ask", "formal", "en").unwrap();
        assert!(bare.contains("group-chat assistant"));
    }

    #[test]
    fn test_unknown_command_is_none() {
        let registry = PromptRegistry::with_defaults();
        assert!(registry.resolve("dance", "sarcastic", "ru").is_none());
    }

    #[test]
    fn test_runtime_override() {
        let registry = PromptRegistry::with_defaults();
        registry.set("ask:formal:en", "Be extremely polite.");
        let got = registry.resolve("ask", "formal", "en").unwrap();
        assert_eq!(got, "Be extremely polite.");
    }
}
