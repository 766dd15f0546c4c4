//! Nickname extraction from reply addressing
//!
//! Only fires on replies to another known user: "Эй Вася, ...",
//! "Вася, ...", "Вася: ...", or a bare capitalised word. Candidates are
//! vetoed against a stop-word list and length bounds before being
//! recorded as aliases for the reply target.

use lazy_static::lazy_static;
use regex::Regex;

const MIN_LEN: usize = 3;
const MAX_LEN: usize = 15;

lazy_static! {
    static ref HEY_PATTERN: Regex =
        Regex::new(r"^[ЭэЕе]й[\s,]+([A-ZА-ЯЁ][a-zа-яё]+)").unwrap();
    static ref COMMA_PATTERN: Regex = Regex::new(r"^([A-ZА-ЯЁ][a-zа-яё]+),\s").unwrap();
    static ref COLON_PATTERN: Regex = Regex::new(r"^([A-ZА-ЯЁ][a-zа-яё]+):\s").unwrap();
    static ref BARE_PATTERN: Regex = Regex::new(r"^([A-ZА-ЯЁ][a-zа-яё]+)[!?.]?$").unwrap();
}

/// Sentence starters and interjections that look like capitalised names.
const STOP_WORDS: &[&str] = &[
    "привет", "спасибо", "ладно", "окей", "хорошо", "давай", "слушай",
    "кстати", "короче", "значит", "вообще", "почему", "когда", "зачем",
    "может", "точно", "правда", "сегодня", "завтра", "вчера", "народ",
    "ребята", "парни", "всем", "доброе", "добрый",
];

/// Extract a nickname candidate from reply text. `None` when the text
/// does not address the reply target by name.
pub fn extract_nickname(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = HEY_PATTERN
        .captures(trimmed)
        .or_else(|| COMMA_PATTERN.captures(trimmed))
        .or_else(|| COLON_PATTERN.captures(trimmed))
        .or_else(|| BARE_PATTERN.captures(trimmed))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())?;

    let len = candidate.chars().count();
    if !(MIN_LEN..=MAX_LEN).contains(&len) {
        return None;
    }
    if STOP_WORDS.contains(&candidate.to_lowercase().as_str()) {
        return None;
    }

    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hey_pattern() {
        assert_eq!(extract_nickname("Эй Вася, ты тут?"), Some("Вася".into()));
        assert_eq!(extract_nickname("эй, Петруха, глянь"), Some("Петруха".into()));
    }

    #[test]
    fn test_comma_and_colon_patterns() {
        assert_eq!(extract_nickname("Вася, глянь ссылку"), Some("Вася".into()));
        assert_eq!(extract_nickname("Вася: держи"), Some("Вася".into()));
    }

    #[test]
    fn test_bare_capitalised_word() {
        assert_eq!(extract_nickname("Васян"), Some("Васян".into()));
        assert_eq!(extract_nickname("Васян!"), Some("Васян".into()));
    }

    #[test]
    fn test_stop_words_vetoed() {
        assert_eq!(extract_nickname("Привет, как дела?"), None);
        assert_eq!(extract_nickname("Спасибо"), None);
        assert_eq!(extract_nickname("Короче, слушай сюда"), None);
    }

    #[test]
    fn test_length_bounds() {
        assert_eq!(extract_nickname("Ян, привет"), None); // too short
        assert_eq!(
            extract_nickname("Константинопольский, привет"),
            None // too long
        );
    }

    #[test]
    fn test_mid_sentence_name_is_not_addressing() {
        assert_eq!(extract_nickname("вчера видел Васю в парке"), None);
    }
}
