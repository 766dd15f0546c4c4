//! Repeated-message filter
//!
//! Drops identical messages re-sent by the same user within a short TTL.
//! Short messages ("да", "+1", stickers' captions) are exempt: repeats of
//! those are normal conversation, not spam or client retries.

use std::time::Duration;

use moka::sync::Cache;

const DEDUP_TTL: Duration = Duration::from_secs(60);
const MIN_LENGTH: usize = 10;
const KEY_TEXT_LIMIT: usize = 500;

pub struct DedupFilter {
    seen: Cache<(i64, i64, String), ()>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self {
            seen: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(DEDUP_TTL)
                .build(),
        }
    }

    /// Normalised cache key text: lowercased, whitespace collapsed,
    /// truncated to a bounded number of characters.
    fn normalise(text: &str) -> String {
        let collapsed = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        collapsed.chars().take(KEY_TEXT_LIMIT).collect()
    }

    /// Returns true when this message is a recent repeat and should be
    /// ignored. Records the message as seen otherwise.
    pub fn is_repeat(&self, chat_id: i64, user_id: i64, text: &str) -> bool {
        if text.chars().count() < MIN_LENGTH {
            return false;
        }

        let key = (chat_id, user_id, Self::normalise(text));
        if self.seen.contains_key(&key) {
            return true;
        }
        self.seen.insert(key, ());
        false
    }
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_within_ttl_is_dropped() {
        let filter = DedupFilter::new();
        assert!(!filter.is_repeat(1, 2, "это достаточно длинное сообщение"));
        assert!(filter.is_repeat(1, 2, "это достаточно длинное сообщение"));
    }

    #[test]
    fn test_short_messages_never_dedup() {
        let filter = DedupFilter::new();
        assert!(!filter.is_repeat(1, 2, "да"));
        assert!(!filter.is_repeat(1, 2, "да"));
    }

    #[test]
    fn test_different_user_is_not_a_repeat() {
        let filter = DedupFilter::new();
        assert!(!filter.is_repeat(1, 2, "это достаточно длинное сообщение"));
        assert!(!filter.is_repeat(1, 3, "это достаточно длинное сообщение"));
    }

    #[test]
    fn test_normalisation_collapses_case_and_spaces() {
        let filter = DedupFilter::new();
        assert!(!filter.is_repeat(1, 2, "Это Достаточно   Длинное Сообщение"));
        assert!(filter.is_repeat(1, 2, "это достаточно длинное сообщение"));
    }
}
