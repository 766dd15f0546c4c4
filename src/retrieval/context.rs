//! Context builder for the answer prompt
//!
//! Deduplicates retrieved chunks, optionally expands thin results with the
//! messages surrounding each hit, trims everything to a token budget and
//! tags each chunk with timestamp and author. Promotional/news forwards
//! ("news dumps") sort to the back so organic conversation wins the budget.

use chrono::FixedOffset;

use super::search::{Candidate, CandidateSource};
use crate::error::Result;
use crate::store::MessageStore;

/// Approximate prompt budget for retrieved context.
pub const DEFAULT_TOKEN_BUDGET: usize = 2000;

/// Hits that trigger neighbour expansion when results are thin.
const EXPAND_HITS: usize = 3;
const EXPAND_BEFORE: i64 = 2;
const EXPAND_AFTER: i64 = 2;

/// Heuristic for promotional/news forwards, kept as one named object so
/// the rule set is testable in isolation.
#[derive(Debug, Clone)]
pub struct NewsDumpPolicy {
    pub long_forward_length: usize,
    pub max_links_inline: usize,
}

impl Default for NewsDumpPolicy {
    fn default() -> Self {
        Self {
            long_forward_length: 400,
            max_links_inline: 1,
        }
    }
}

const PROMO_MARKERS: &[&str] = &[
    "подписывайтесь",
    "подписаться",
    "реклама",
    "промокод",
    "скидк",
    "акция",
    "розыгрыш",
    "читать далее",
    "читайте в нашем канале",
    "t.me/",
    "breaking",
];

impl NewsDumpPolicy {
    /// Whether a chunk of text looks like forwarded promotional/news
    /// content rather than conversation.
    pub fn is_news_dump(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();

        if PROMO_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return true;
        }

        let link_count = lowered.matches("http").count();
        if link_count > self.max_links_inline {
            return true;
        }
        if link_count > 0 && text.chars().count() > self.long_forward_length {
            return true;
        }

        false
    }
}

fn approx_tokens(text: &str) -> usize {
    // Rough 4-characters-per-token estimate, good enough for budgeting.
    text.chars().count().div_ceil(4)
}

fn format_chunk(candidate: &Candidate, tz: FixedOffset) -> String {
    let when = candidate
        .sent_at
        .map(|t| t.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "context".to_string());
    let author = candidate.author.as_deref().unwrap_or("chat");
    format!("[{when}] {author}: {}", candidate.text)
}

pub struct ContextBuilder {
    store: MessageStore,
    policy: NewsDumpPolicy,
    token_budget: usize,
    tz: FixedOffset,
}

impl ContextBuilder {
    pub fn new(store: MessageStore, timezone_offset_hours: i32) -> Self {
        let tz = FixedOffset::east_opt(timezone_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        Self {
            store,
            policy: NewsDumpPolicy::default(),
            token_budget: DEFAULT_TOKEN_BUDGET,
            tz,
        }
    }

    /// Assemble the retrieved-context block for the answer prompt.
    pub async fn build(&self, chat_id: i64, candidates: &[Candidate]) -> Result<String> {
        // Dedup on (source kind, id) and on identical text.
        let mut seen_keys = std::collections::HashSet::new();
        let mut seen_texts = std::collections::HashSet::new();
        let mut organic: Vec<&Candidate> = Vec::new();
        let mut dumps: Vec<&Candidate> = Vec::new();

        for candidate in candidates {
            let key = (candidate.source, candidate.message_id);
            if !seen_keys.insert(key) {
                continue;
            }
            if !seen_texts.insert(candidate.text.trim().to_string()) {
                continue;
            }
            if self.policy.is_news_dump(&candidate.text) {
                dumps.push(candidate);
            } else {
                organic.push(candidate);
            }
        }

        let mut blocks: Vec<String> = Vec::new();
        let mut spent = 0usize;

        for candidate in organic.iter().chain(dumps.iter()).copied() {
            let mut block = format_chunk(candidate, self.tz);

            // Thin result sets get surrounding messages for coherence.
            if organic.len() < EXPAND_HITS && candidate.source == CandidateSource::Message {
                if let Some(sent_at) = candidate.sent_at {
                    if let Ok(neighbours) = self
                        .store
                        .surrounding(chat_id, sent_at, EXPAND_BEFORE, EXPAND_AFTER)
                        .await
                    {
                        for neighbour in neighbours {
                            if neighbour.message_id == candidate.message_id {
                                continue;
                            }
                            block.push('\n');
                            block.push_str(&format!(
                                "[{}] {}: {}",
                                neighbour
                                    .sent_at
                                    .with_timezone(&self.tz)
                                    .format("%Y-%m-%d %H:%M"),
                                neighbour.author_label(),
                                neighbour.text_or_empty()
                            ));
                        }
                    }
                }
            }

            let cost = approx_tokens(&block);
            if spent + cost > self.token_budget {
                break;
            }
            spent += cost;
            blocks.push(block);
        }

        Ok(blocks.join("\n---\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promo_markers_flagged() {
        let policy = NewsDumpPolicy::default();
        assert!(policy.is_news_dump("Подписывайтесь на наш канал! t.me/channel"));
        assert!(policy.is_news_dump("СКИДКА 50% только сегодня, промокод ЧАТ"));
    }

    #[test]
    fn test_link_density_flagged() {
        let policy = NewsDumpPolicy::default();
        assert!(policy.is_news_dump("http://a.example http://b.example сравни"));
    }

    #[test]
    fn test_long_text_with_link_flagged() {
        let policy = NewsDumpPolicy::default();
        let long = format!("{} http://news.example", "слово ".repeat(80));
        assert!(policy.is_news_dump(&long));
    }

    #[test]
    fn test_conversation_not_flagged() {
        let policy = NewsDumpPolicy::default();
        assert!(!policy.is_news_dump("да я вчера в кино ходил, норм фильм"));
        assert!(!policy.is_news_dump("глянь http://example.com"));
    }

    #[test]
    fn test_approx_tokens() {
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("abcd"), 1);
        assert_eq!(approx_tokens("abcdefgh!"), 3);
    }
}
