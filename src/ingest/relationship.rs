//! Deterministic relationship extraction
//!
//! A small compiled pattern set over message text yields
//! (person name, surface label, confidence) triples:
//!
//! - introduction: "это моя жена Таня"
//! - possessive:   "моя жена Таня сказала"
//! - reverse-intro: "Таня - моя жена"
//! - instrumental: "гулял с моей женой Таней"
//!
//! Exclusive canonical types (spouse, partner) end the previous active
//! relationship when a different person appears; that policy lives in the
//! relationship store, this module only extracts.

use lazy_static::lazy_static;
use regex::Regex;

/// One extracted relationship mention.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipMention {
    pub person_name: String,
    pub surface_label: String,
    pub canonical_type: &'static str,
    pub exclusive: bool,
    pub confidence: f32,
}

const LABELS: &str = "жена|муж|супруга|супруг|девушка|парень|невеста|жених|\
                      брат|сестра|мама|мать|папа|отец|сын|дочь|дочка|\
                      друг|подруга|коллега|тёща|тесть|свекровь|свёкор|\
                      тётя|дядя|бабушка|дедушка|племянник|племянница";

const LABELS_INSTRUMENTAL: &str = "женой|мужем|супругой|супругом|девушкой|парнем|\
                                   братом|сестрой|мамой|матерью|папой|отцом|сыном|дочерью|дочкой|\
                                   другом|подругой|коллегой|тёщей|тестем|тётей|дядей|\
                                   бабушкой|дедушкой";

lazy_static! {
    static ref INTRO: Regex = Regex::new(&format!(
        r"[Ээ]то\s+[Мм]о[йяё]\s+({LABELS})\s+([А-ЯЁA-Z][а-яёa-z]+)"
    ))
    .unwrap();
    static ref POSSESSIVE: Regex = Regex::new(&format!(
        r"(?:^|\s)[Мм]о[йяё]\s+({LABELS})\s+([А-ЯЁA-Z][а-яёa-z]+)"
    ))
    .unwrap();
    static ref REVERSE_INTRO: Regex = Regex::new(&format!(
        r"([А-ЯЁA-Z][а-яёa-z]+)\s*[-—]\s*[Мм]о[йяё]\s+({LABELS})"
    ))
    .unwrap();
    static ref INSTRUMENTAL: Regex = Regex::new(&format!(
        r"с\s+[Мм]о(?:ей|им)\s+({LABELS_INSTRUMENTAL})\s+([А-ЯЁA-Z][а-яёa-z]+)"
    ))
    .unwrap();
}

/// Map a surface label to its canonical relationship type.
///
/// The second element marks exclusive types: at most one active row per
/// (user, type).
pub fn canonical_type(surface: &str) -> Option<(&'static str, bool)> {
    let label = normalise_label(surface);
    let mapped = match label.as_str() {
        "жена" | "муж" | "супруга" | "супруг" => ("spouse", true),
        "девушка" | "парень" | "невеста" | "жених" => ("partner", true),
        "брат" | "сестра" => ("sibling", false),
        "мама" | "мать" | "папа" | "отец" => ("parent", false),
        "сын" | "дочь" | "дочка" => ("child", false),
        "друг" | "подруга" => ("friend", false),
        "коллега" => ("colleague", false),
        "тёща" | "тесть" | "свекровь" | "свёкор" | "тётя" | "дядя" | "бабушка"
        | "дедушка" | "племянник" | "племянница" => ("relative", false),
        _ => return None,
    };
    Some(mapped)
}

/// De-inflect an instrumental-case label back to nominative.
fn normalise_label(surface: &str) -> String {
    let lower = surface.to_lowercase();
    match lower.as_str() {
        "женой" => "жена".into(),
        "мужем" => "муж".into(),
        "супругой" => "супруга".into(),
        "супругом" => "супруг".into(),
        "девушкой" => "девушка".into(),
        "парнем" => "парень".into(),
        "братом" => "брат".into(),
        "сестрой" => "сестра".into(),
        "мамой" => "мама".into(),
        "матерью" => "мать".into(),
        "папой" => "папа".into(),
        "отцом" => "отец".into(),
        "сыном" => "сын".into(),
        "дочерью" => "дочь".into(),
        "дочкой" => "дочка".into(),
        "другом" => "друг".into(),
        "подругой" => "подруга".into(),
        "коллегой" => "коллега".into(),
        "тёщей" => "тёща".into(),
        "тестем" => "тесть".into(),
        "тётей" => "тётя".into(),
        "дядей" => "дядя".into(),
        "бабушкой" => "бабушка".into(),
        "дедушкой" => "дедушка".into(),
        _ => lower,
    }
}

/// Best-effort nominative for a name captured in instrumental case
/// ("Таней" → "Таня", "Олей" → "Оля").
fn deinflect_name(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ей") {
        return format!("{stem}я");
    }
    if let Some(stem) = name.strip_suffix("ой") {
        return format!("{stem}а");
    }
    if let Some(stem) = name.strip_suffix("ом").or_else(|| name.strip_suffix("ем")) {
        return stem.to_string();
    }
    name.to_string()
}

fn mention(
    name: &str,
    surface: &str,
    confidence: f32,
) -> Option<RelationshipMention> {
    let (canonical, exclusive) = canonical_type(surface)?;
    Some(RelationshipMention {
        person_name: name.to_string(),
        surface_label: normalise_label(surface),
        canonical_type: canonical,
        exclusive,
        confidence,
    })
}

/// Extract every relationship mention from one message.
pub fn extract_relationships(text: &str) -> Vec<RelationshipMention> {
    let mut mentions = Vec::new();

    for caps in INTRO.captures_iter(text) {
        if let Some(m) = mention(&caps[2], &caps[1], 0.9) {
            mentions.push(m);
        }
    }
    for caps in REVERSE_INTRO.captures_iter(text) {
        if let Some(m) = mention(&caps[1], &caps[2], 0.85) {
            mentions.push(m);
        }
    }
    for caps in POSSESSIVE.captures_iter(text) {
        if let Some(m) = mention(&caps[2], &caps[1], 0.8) {
            mentions.push(m);
        }
    }
    for caps in INSTRUMENTAL.captures_iter(text) {
        let name = deinflect_name(&caps[2]);
        if let Some(m) = mention(&name, &caps[1], 0.6) {
            mentions.push(m);
        }
    }

    // Introduction subsumes possessive on the same span; keep the
    // highest-confidence mention per (name, type).
    mentions.sort_by(|a, b| {
        (&a.person_name, a.canonical_type)
            .cmp(&(&b.person_name, b.canonical_type))
            .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
    });
    mentions.dedup_by(|a, b| a.person_name == b.person_name && a.canonical_type == b.canonical_type);

    mentions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introduction_pattern() {
        let mentions = extract_relationships("Знакомьтесь, это моя жена Таня");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].person_name, "Таня");
        assert_eq!(mentions[0].canonical_type, "spouse");
        assert!(mentions[0].exclusive);
        assert!((mentions[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_possessive_pattern() {
        let mentions = extract_relationships("вчера мой брат Миша приехал");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].person_name, "Миша");
        assert_eq!(mentions[0].canonical_type, "sibling");
        assert!(!mentions[0].exclusive);
    }

    #[test]
    fn test_reverse_intro_pattern() {
        let mentions = extract_relationships("Оля — моя девушка");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].person_name, "Оля");
        assert_eq!(mentions[0].canonical_type, "partner");
    }

    #[test]
    fn test_instrumental_pattern() {
        let mentions = extract_relationships("ездили с моей женой Таней на дачу");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].person_name, "Таня");
        assert_eq!(mentions[0].surface_label, "жена");
        assert_eq!(mentions[0].canonical_type, "spouse");
    }

    #[test]
    fn test_intro_subsumes_possessive() {
        // "это моя жена Таня" matches both intro and possessive; only the
        // higher-confidence mention survives.
        let mentions = extract_relationships("это моя жена Таня");
        assert_eq!(mentions.len(), 1);
        assert!((mentions[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_label_ignored() {
        assert!(extract_relationships("это мой велосипед Гоша").is_empty());
    }

    #[test]
    fn test_plain_text_yields_nothing() {
        assert!(extract_relationships("сегодня хорошая погода").is_empty());
    }
}
