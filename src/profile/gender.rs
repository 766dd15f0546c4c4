//! Hybrid gender detection
//!
//! Fast path: a dictionary of common Russian names plus a name-ending
//! heuristic, typical confidence ≥ 0.6. Slow path: pattern matching over
//! the user's recent messages (past-tense verb endings and gendered
//! self-referents) raises confidence. The profile store never overwrites
//! a higher-confidence value with a lower one.

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

const MALE_NAMES: &[&str] = &[
    "александр", "алексей", "андрей", "антон", "артём", "артем", "борис",
    "вадим", "василий", "виктор", "виталий", "владимир", "вова", "гриша",
    "григорий", "даниил", "данила", "денис", "дима", "дмитрий", "егор",
    "евгений", "женя", "иван", "игорь", "илья", "кирилл", "коля", "костя",
    "константин", "лёша", "леша", "максим", "миша", "михаил", "никита",
    "николай", "олег", "павел", "паша", "пётр", "петр", "петя", "роман",
    "рома", "саша", "сергей", "серёжа", "стас", "фёдор", "федор", "юрий",
    "ярослав", "вася",
];

const FEMALE_NAMES: &[&str] = &[
    "александра", "алина", "алла", "анастасия", "настя", "анна", "аня",
    "валентина", "валерия", "лера", "вера", "виктория", "вика", "галина",
    "галя", "дарья", "даша", "екатерина", "катя", "елена", "лена",
    "елизавета", "лиза", "жанна", "зоя", "инна", "ирина", "ира", "карина",
    "кристина", "ксения", "ксюша", "лариса", "любовь", "люба", "людмила",
    "люда", "маргарита", "рита", "марина", "мария", "маша", "надежда",
    "надя", "наталья", "наташа", "нина", "оксана", "ольга", "оля",
    "полина", "светлана", "света", "софия", "соня", "таня", "татьяна",
    "юлия", "юля", "яна",
];

lazy_static! {
    // "я сделал", "я пошёл", "я видел" vs "я сделала", "я пошла"
    static ref PAST_FEMALE: Regex =
        Regex::new(r"(?i)\bя\s+\p{L}+ла\b").unwrap();
    static ref PAST_MALE: Regex =
        Regex::new(r"(?i)\bя\s+\p{L}+[лё]\b").unwrap();
    static ref SELF_FEMALE: Regex =
        Regex::new(r"(?i)\bя\s+(сама|рада|должна|уверена|готова)\b").unwrap();
    static ref SELF_MALE: Regex =
        Regex::new(r"(?i)\bя\s+(сам|рад|должен|уверен|готов)\b").unwrap();
}

/// Detect gender from a display name.
pub fn from_name(display_name: &str) -> Option<(Gender, f32)> {
    let first = display_name.split_whitespace().next()?.to_lowercase();
    if first.is_empty() {
        return None;
    }

    if MALE_NAMES.contains(&first.as_str()) {
        return Some((Gender::Male, 0.9));
    }
    if FEMALE_NAMES.contains(&first.as_str()) {
        return Some((Gender::Female, 0.9));
    }

    // Ending heuristic for Slavic names; weaker than the dictionary.
    if first.chars().count() >= 3 {
        if first.ends_with('а') || first.ends_with('я') {
            return Some((Gender::Female, 0.6));
        }
        if first.chars().last().map(|c| c.is_alphabetic() && !"аеёиоуыэюя".contains(c))
            == Some(true)
        {
            return Some((Gender::Male, 0.6));
        }
    }

    None
}

/// Detect gender from recent message texts.
pub fn from_messages(texts: &[String]) -> Option<(Gender, f32)> {
    let mut male = 0usize;
    let mut female = 0usize;

    for text in texts {
        female += PAST_FEMALE.find_iter(text).count();
        female += SELF_FEMALE.find_iter(text).count();
        male += SELF_MALE.find_iter(text).count();
        male += PAST_MALE.find_iter(text).count();
    }

    let total = male + female;
    if total < 2 {
        return None;
    }

    let (gender, wins) = if male >= female {
        (Gender::Male, male)
    } else {
        (Gender::Female, female)
    };
    let ratio = wins as f32 / total as f32;
    if ratio < 0.7 {
        return None;
    }

    // 0.7 at a bare majority, up to 0.85 when the signal is unanimous
    let confidence = 0.7 + 0.15 * ((ratio - 0.7) / 0.3);
    Some((gender, confidence.min(0.85)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary_names() {
        assert_eq!(from_name("Дима Иванов"), Some((Gender::Male, 0.9)));
        assert_eq!(from_name("Настя"), Some((Gender::Female, 0.9)));
    }

    #[test]
    fn test_ending_heuristic() {
        let (gender, conf) = from_name("Зарина").unwrap();
        assert_eq!(gender, Gender::Female);
        assert!((conf - 0.6).abs() < 1e-6);

        let (gender, conf) = from_name("Тимур").unwrap();
        assert_eq!(gender, Gender::Male);
        assert!((conf - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_non_slavic_name_is_unknown() {
        assert_eq!(from_name("John"), Some((Gender::Male, 0.6)));
        assert_eq!(from_name("爱丽丝"), None);
    }

    #[test]
    fn test_messages_past_tense() {
        let texts = vec![
            "я сделала уборку".to_string(),
            "вчера я ходила в кино".to_string(),
            "я купила новый телефон".to_string(),
        ];
        let (gender, conf) = from_messages(&texts).unwrap();
        assert_eq!(gender, Gender::Female);
        assert!(conf >= 0.7);
    }

    #[test]
    fn test_messages_self_referents() {
        let texts = vec![
            "я сам разберусь".to_string(),
            "я уверен что это так".to_string(),
        ];
        let (gender, _) = from_messages(&texts).unwrap();
        assert_eq!(gender, Gender::Male);
    }

    #[test]
    fn test_mixed_signals_stay_unknown() {
        let texts = vec![
            "я сделал это".to_string(),
            "я сделала то".to_string(),
        ];
        assert_eq!(from_messages(&texts), None);
    }

    #[test]
    fn test_too_few_signals() {
        assert_eq!(from_messages(&["привет всем".to_string()]), None);
    }
}
