//! Slot extraction helpers shared by the intent templates

use regex::Captures;

/// Words that look like a place or person name but are not one
const NOT_A_NAME: &[&str] = &[
    "all", "any", "each", "every", "the", "this", "that", "these", "those", "them", "it", "my",
    "our", "which", "what", "total", "fleet", "vehicles", "vehicle", "plants", "plant", "regions",
    "region", "zones", "zone", "today", "yesterday", "company", "list", "details", "detail",
    "info", "information", "master", "data", "report", "records",
];

const NAME_SUFFIXES: &[&str] = &[
    "plant", "plants", "facility", "depot", "region", "district", "zone", "area",
];

/// First participating capture group
pub fn first_group<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.iter()
        .skip(1)
        .flatten()
        .map(|m| m.as_str())
        .find(|s| !s.trim().is_empty())
}

/// Normalised vehicle registration; must mix letters and digits
pub fn registration(raw: &str) -> Option<String> {
    let token = raw
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_uppercase();
    let valid = (3..=20).contains(&token.len())
        && token.chars().any(|c| c.is_ascii_digit())
        && token.chars().any(|c| c.is_ascii_alphabetic())
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then_some(token)
}

/// Place name with articles and level words trimmed, in the user's casing
pub fn place_name(original: &str, raw: &str) -> Option<String> {
    let mut words: Vec<&str> = raw
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '&'))
        .filter(|w| !w.is_empty())
        .collect();
    while words.first().map_or(false, |w| *w == "the") {
        words.remove(0);
    }
    while words.len() > 1 && words.last().map_or(false, |w| NAME_SUFFIXES.contains(w)) {
        words.pop();
    }
    let name = words.join(" ");
    if name.is_empty()
        || name.len() > 60
        || NOT_A_NAME.contains(&name.as_str())
        || name.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    Some(recover_case(original, &name))
}

/// Person name: one or two alphabetic words
pub fn person_name(original: &str, raw: &str) -> Option<String> {
    let words: Vec<&str> = raw.split_whitespace().collect();
    if words.is_empty()
        || words.len() > 2
        || words.iter().any(|w| NOT_A_NAME.contains(w))
        || !words.iter().all(|w| w.chars().all(char::is_alphabetic))
    {
        return None;
    }
    Some(recover_case(original, &words.join(" ")))
}

pub fn number(raw: &str) -> Option<i64> {
    raw.trim().trim_start_matches('#').parse().ok()
}

/// Find `fragment` (lower-cased) in the original text and return it in the
/// original casing
pub fn recover_case(original: &str, fragment: &str) -> String {
    let lowered = original.to_lowercase();
    if lowered.len() == original.len() {
        if let Some(at) = lowered.find(fragment) {
            return original[at..at + fragment.len()].to_string();
        }
    }
    fragment.to_string()
}
