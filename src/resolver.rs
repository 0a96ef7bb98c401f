//! Reference Resolver
//!
//! Runs before intent classification. Detectors, in order:
//!
//! 1. ordinal ("the 3rd vehicle") against the displayed rows of the last result
//! 2. pronominal ("those", "which ones", "tell me about X")
//! 3. topic continuation ("and yesterday?") against the session's entities
//!
//! The resolver is conservative: without a confident target it either leaves
//! the utterance alone or asks.

use std::ops::Range;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::context::{DisplayedItem, EntityKind, LastResult, Session};
use crate::error::PipelineError;
use crate::followup::{fallback, FollowUpOp, ReferentialOperation};
use crate::formatter::cell_text;
use crate::intent::slots::registration;
use crate::planner::dates::find_date_range;

static ORDINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:the\s+)?(first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth|last|(\d+)(?:st|nd|rd|th)|#\s*(\d+))\s+(vehicle|truck|complaint|item|one|row|plant|driver|record|result|entry)s?\b",
    )
    .expect("valid regex")
});
static PRONOUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:those|these|them|their|there|the\s+above|which\s+ones|which\s+of\s+them|among\s+them)\b")
        .expect("valid regex")
});
/// "are there", "there is": existential, not a reference
static EXISTENTIAL_THERE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:is|are|was|were)\s+there\b|\bthere\s+(?:is|are|was|were)\b").expect("valid regex")
});
static DETAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:more\s+)?(?:details?|info(?:rmation)?)\s+(?:about|on|for)\s+(?:the\s+)?(.+?)\s*[?.!]*$|\btell\s+me\s+(?:more\s+)?about\s+(?:the\s+)?(.+?)\s*[?.!]*$",
    )
    .expect("valid regex")
});
static TOPIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:and\s+)?(?:what|how)\s+about\s+(.+?)\s*[?.!]*$|^and\s+(?:for\s+)?(.+?)\s*[?.!]*$|^same\s+for\s+(.+?)\s*[?.!]*$")
        .expect("valid regex")
});
static REFORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:can\s+you\s+|please\s+)?(?:show|display|give|put|present|format|reformat|arrange)\s+(?:me\s+)?(?:that|this|it|those|these|them|the\s+above|the\s+(?:previous|last)\s+results?)\s*(?:as|in(?:to)?)?\s*(?:a\s+)?(?:table|tabular\s+form|list)?\s*(?:please)?\s*[?.!]*$|^(?:format|reformat)\s+(?:the\s+)?(?:above|results?|output)\b",
    )
    .expect("valid regex")
});

/// The row an ordinal picked out
#[derive(Debug, Clone, PartialEq)]
pub struct OrdinalTarget {
    pub position: usize,
    pub noun: String,
    pub value: String,
}

impl OrdinalTarget {
    /// "the 3rd vehicle, WB01A0003"
    pub fn subject(&self) -> String {
        format!("the {} {}, {}", ordinal_text(self.position), self.noun, self.value)
    }
}

#[derive(Debug)]
pub enum Resolution {
    Unchanged,
    Rewritten {
        utterance: String,
        target: Option<OrdinalTarget>,
    },
    Referential(ReferentialOperation),
    Clarify(PipelineError),
}

/// "show that as a table": re-render the last result without a query
pub fn is_reformat_request(utterance: &str) -> bool {
    REFORMAT.is_match(utterance.trim().to_lowercase().as_str())
}

pub fn resolve(utterance: &str, session: &Session, today: NaiveDate) -> Resolution {
    let lowered = utterance.trim().to_lowercase();

    if let Some(resolution) = resolve_ordinal(utterance, &lowered, session) {
        return resolution;
    }
    if let Some(resolution) = resolve_pronoun(utterance, &lowered, session.last_result()) {
        return resolution;
    }
    resolve_topic(&lowered, session, today).unwrap_or(Resolution::Unchanged)
}

fn resolve_ordinal(original: &str, lowered: &str, session: &Session) -> Option<Resolution> {
    let caps = ORDINAL.captures(lowered)?;
    let whole = caps.get(0)?;
    let word = caps.get(1)?.as_str();
    let noun = caps.get(4)?.as_str();

    let Some(last) = session.last_result() else {
        return Some(Resolution::Clarify(PipelineError::ReferenceUnresolved {
            reason: format!("There is no previous result to pick the {} {} from.", word, noun),
            candidates: Vec::new(),
        }));
    };

    let position = match word {
        "last" => last.displayed_items.len(),
        _ => caps
            .get(2)
            .or_else(|| caps.get(3))
            .and_then(|m| m.as_str().parse().ok())
            .or_else(|| ordinal_word(word))?,
    };

    let item = match session.item_by_ordinal(position) {
        Ok(item) => item,
        Err(e) => return Some(Resolution::Clarify(e.into())),
    };

    let Some((kind, value)) = stable_identifier(item, noun) else {
        return Some(Resolution::Clarify(PipelineError::ReferenceUnresolved {
            reason: format!("I can't tell which {} row {} refers to.", noun, position),
            candidates: last.columns.clone(),
        }));
    };

    let replacement = if kind.is_empty() {
        value.clone()
    } else {
        format!("{} {}", kind, value)
    };
    // keep the user's casing outside the reference
    let original = original.trim();
    let utterance = match original_range(original, whole.range()) {
        Some(span) => format!("{}{}{}", &original[..span.start], replacement, &original[span.end..]),
        None => format!("{}{}{}", &lowered[..whole.start()], replacement, &lowered[whole.end()..]),
    };
    debug!(position, %utterance, "ordinal reference rewritten");

    let noun = match noun {
        "one" | "item" | "row" | "record" | "result" | "entry" if !kind.is_empty() => kind,
        "truck" => "vehicle",
        other => other,
    };
    Some(Resolution::Rewritten {
        utterance,
        target: Some(OrdinalTarget {
            position,
            noun: noun.to_string(),
            value,
        }),
    })
}

fn resolve_pronoun(original: &str, lowered: &str, last: Option<&LastResult>) -> Option<Resolution> {
    if let Some(caps) = DETAIL.captures(lowered) {
        let mention = caps.get(1).or_else(|| caps.get(2))?;
        if let Some(last) = last {
            let trimmed = original.trim();
            let text = match original_range(trimmed, mention.range()) {
                Some(span) => &trimmed[span],
                None => mention.as_str(),
            };
            if let Some(entity) = visible_entity(text, last) {
                return Some(Resolution::Referential(ReferentialOperation {
                    utterance: original.to_string(),
                    op: Some(FollowUpOp::DetailExpansion { entity }),
                }));
            }
        }
    }

    let scrubbed = EXISTENTIAL_THERE.replace_all(lowered, " ");
    let found = PRONOUN.find(&scrubbed)?;

    let Some(last) = last else {
        return Some(Resolution::Clarify(PipelineError::ReferenceUnresolved {
            reason: format!("There are no previous results for \"{}\" to refer to.", found.as_str()),
            candidates: Vec::new(),
        }));
    };

    // a single remembered row is an identifiable target, unless the question
    // is itself an operation over the rows
    if let [item] = last.displayed_items.as_slice() {
        if fallback::plan(original, last).is_none() {
            if let Some((kind, value)) = stable_identifier(item, "one") {
                if !kind.is_empty() {
                    let utterance = format!(
                        "{}{} {}{}",
                        &scrubbed[..found.start()],
                        kind,
                        value,
                        &scrubbed[found.end()..]
                    );
                    let utterance = utterance.split_whitespace().collect::<Vec<_>>().join(" ");
                    debug!(%utterance, "pronoun bound to the single previous row");
                    return Some(Resolution::Rewritten {
                        utterance,
                        target: None,
                    });
                }
            }
        }
    }

    Some(Resolution::Referential(ReferentialOperation {
        utterance: original.to_string(),
        op: None,
    }))
}

fn resolve_topic(lowered: &str, session: &Session, today: NaiveDate) -> Option<Resolution> {
    let caps = TOPIC.captures(lowered)?;
    let rest = caps
        .iter()
        .skip(1)
        .flatten()
        .map(|m| m.as_str().trim())
        .find(|s| !s.is_empty())?;

    let entities = session.entities();
    let report = entities.get(EntityKind::ReportKind);
    let vehicle_in_rest = rest.split_whitespace().find_map(registration_token);
    let date_in_rest = find_date_range(rest, today).is_some();

    let Some(report) = report else {
        if date_in_rest {
            return Some(Resolution::Clarify(PipelineError::ReferenceUnresolved {
                reason: format!("What would you like to know about {}?", rest),
                candidates: Vec::new(),
            }));
        }
        return None;
    };

    let utterance = match (vehicle_in_rest, date_in_rest) {
        (Some(vehicle), _) => {
            let date = entities
                .get(EntityKind::DateContext)
                .filter(|label| !date_in_rest && find_date_range(label, today).is_some());
            let rest = rest
                .replace("vehicle ", "")
                .replace("truck ", "")
                .replace(&vehicle.to_lowercase(), "");
            let rest = rest.trim();
            let mut text = format!("{} for vehicle {}", report, vehicle);
            if !rest.is_empty() {
                text.push(' ');
                text.push_str(rest);
            }
            if let Some(label) = date {
                text.push(' ');
                text.push_str(label);
            }
            text
        }
        (None, true) => match entities.get(EntityKind::Vehicle) {
            Some(vehicle) if report != "production report" => {
                format!("{} for vehicle {} {}", report, vehicle, rest)
            }
            _ => format!("{} {}", report, rest),
        },
        (None, false) => format!("{} for {}", report, rest),
    };
    debug!(%utterance, "topic continuation bound to session entities");
    Some(Resolution::Rewritten {
        utterance,
        target: None,
    })
}

/// Registration-like token that is not an ordinal such as "15th"
fn registration_token(word: &str) -> Option<String> {
    static ORDINAL_TOKEN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\d+(?:st|nd|rd|th)$").expect("valid regex"));
    let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
    if ORDINAL_TOKEN.is_match(word) {
        return None;
    }
    registration(word)
}

/// Column kind and value that identify a displayed row
fn stable_identifier(item: &DisplayedItem, noun: &str) -> Option<(&'static str, String)> {
    const VEHICLE: &[&str] = &["reg_no", "registration_number", "vehicle_reg", "vehicle_no"];
    const COMPLAINT: &[&str] = &["complaint_id"];
    const PLANT: &[&str] = &["plant_name", "plant"];
    const DRIVER: &[&str] = &["driver_name"];

    let pick = |columns: &[&str]| columns.iter().find_map(|c| item.text(c));
    match noun {
        "vehicle" | "truck" => pick(VEHICLE).map(|v| ("vehicle", v)),
        "complaint" => pick(COMPLAINT)
            .or_else(|| pick(&["id_no"]))
            .map(|v| ("complaint", v)),
        "plant" => pick(PLANT).map(|v| ("plant", v)),
        "driver" => pick(DRIVER).map(|v| ("driver", v)),
        _ => pick(VEHICLE)
            .map(|v| ("vehicle", v))
            .or_else(|| pick(COMPLAINT).map(|v| ("complaint", v)))
            .or_else(|| pick(PLANT).map(|v| ("plant", v)))
            .or_else(|| pick(DRIVER).map(|v| ("driver", v)))
            .or_else(|| {
                item.values
                    .values()
                    .map(cell_text)
                    .find(|v| v != "-")
                    .map(|v| ("", v))
            }),
    }
}

/// The mention, if some displayed cell equals it
/// Maps a byte range of `original.to_lowercase()` back onto `original`.
/// Lowercasing can change a char's UTF-8 length, so offsets are walked char
/// by char; `None` when the range splits one char's lowercase form.
fn original_range(original: &str, range: Range<usize>) -> Option<Range<usize>> {
    let mut start = None;
    let mut lowered_at = 0;
    for (at, c) in original.char_indices() {
        if lowered_at == range.start {
            start = Some(at);
        }
        if lowered_at == range.end {
            return start.map(|s| s..at);
        }
        lowered_at += c.to_lowercase().map(char::len_utf8).sum::<usize>();
    }
    if lowered_at == range.start {
        start = Some(original.len());
    }
    if lowered_at != range.end {
        return None;
    }
    start.map(|s| s..original.len())
}

fn visible_entity(mention: &str, last: &LastResult) -> Option<String> {
    let mention = mention
        .trim()
        .trim_start_matches("vehicle ")
        .trim_start_matches("complaint ")
        .trim_start_matches("plant ")
        .trim();
    let needle = mention.to_lowercase();
    if needle.is_empty() {
        return None;
    }
    last.displayed_items
        .iter()
        .flat_map(|item| item.values.values())
        .map(cell_text)
        .find(|text| text.to_lowercase() == needle)
}

fn ordinal_word(word: &str) -> Option<usize> {
    let n = match word {
        "first" => 1,
        "second" => 2,
        "third" => 3,
        "fourth" => 4,
        "fifth" => 5,
        "sixth" => 6,
        "seventh" => 7,
        "eighth" => 8,
        "ninth" => 9,
        "tenth" => 10,
        _ => return None,
    };
    Some(n)
}

fn ordinal_text(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::QueryRows;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
    }

    fn session_with(rows: Vec<(&str, &str)>) -> Session {
        let mut session = Session::new("s", 20, 50);
        session.record_result(LastResult::new(
            "list vehicles",
            "SELECT ...",
            QueryRows::new(
                vec!["reg_no".into(), "plant_name".into()],
                rows.into_iter()
                    .map(|(r, p)| vec![json!(r), json!(p)])
                    .collect(),
            ),
            50,
        ));
        session
    }

    fn three_vehicles() -> Session {
        session_with(vec![
            ("WB01A0001", "Kolkata"),
            ("WB01A0002", "Howrah"),
            ("WB01A0003", "Kolkata"),
        ])
    }

    #[test]
    fn test_ordinal_rewrites_to_registration() {
        match resolve("what region is the 3rd vehicle in?", &three_vehicles(), today()) {
            Resolution::Rewritten { utterance, target } => {
                assert_eq!(utterance, "what region is vehicle WB01A0003 in?");
                let target = target.unwrap();
                assert_eq!(target.position, 3);
                assert_eq!(target.subject(), "the 3rd vehicle, WB01A0003");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ordinal_words_and_last() {
        match resolve("show details of the second one", &three_vehicles(), today()) {
            Resolution::Rewritten { utterance, target } => {
                assert_eq!(utterance, "show details of vehicle WB01A0002");
                assert_eq!(target.unwrap().noun, "vehicle");
            }
            other => panic!("unexpected {:?}", other),
        }
        match resolve("which plant is the last vehicle in", &three_vehicles(), today()) {
            Resolution::Rewritten { utterance, .. } => {
                assert_eq!(utterance, "which plant is vehicle WB01A0003 in")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ordinal_rewrite_with_case_changing_chars() {
        // "İ" grows and "ẞ" shrinks when lowercased: equal total length, shifted offsets
        match resolve("İ: which plant is the 2nd vehicle in, ẞ?", &three_vehicles(), today()) {
            Resolution::Rewritten { utterance, .. } => {
                assert_eq!(utterance, "İ: which plant is vehicle WB01A0002 in, ẞ?")
            }
            other => panic!("unexpected {:?}", other),
        }
        match resolve("Straße İzmir: the FIRST vehicle", &three_vehicles(), today()) {
            Resolution::Rewritten { utterance, .. } => {
                assert_eq!(utterance, "Straße İzmir: vehicle WB01A0001")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_original_range_maps_lowercase_offsets() {
        let original = "İD 7";
        let lowered = original.to_lowercase();
        let at = lowered.find('7').unwrap();
        assert_eq!(original_range(original, at..at + 1), Some(4..5));
        assert_eq!(&original[original_range(original, 0..lowered.len()).unwrap()], original);
        // inside the expansion of "İ"
        assert_eq!(original_range(original, 1..3), None);
    }

    #[test]
    fn test_ordinal_out_of_range_asks() {
        match resolve("the 7th vehicle", &three_vehicles(), today()) {
            Resolution::Clarify(err) => {
                assert!(err.is_clarification());
                assert!(err.user_message().contains("it has 3 items"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let empty = Session::new("s", 20, 50);
        assert!(matches!(
            resolve("the first vehicle", &empty, today()),
            Resolution::Clarify(_)
        ));
    }

    #[test]
    fn test_pronoun_over_many_rows_is_referential() {
        match resolve("which ones are under 10000?", &three_vehicles(), today()) {
            Resolution::Referential(op) => assert_eq!(op.op, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_existential_there_is_not_a_reference() {
        let session = Session::new("s", 20, 50);
        assert!(matches!(
            resolve("how many open complaints are there", &session, today()),
            Resolution::Unchanged
        ));
    }

    #[test]
    fn test_pronoun_with_single_row_rewrites() {
        let session = session_with(vec![("MH12AB1234", "Wagholi")]);
        match resolve("what zone are those in", &session, today()) {
            Resolution::Rewritten { utterance, .. } => {
                assert_eq!(utterance, "what zone are vehicle MH12AB1234 in")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tell_me_about_visible_entity() {
        match resolve("tell me about WB01A0002", &three_vehicles(), today()) {
            Resolution::Referential(op) => assert_eq!(
                op.op,
                Some(FollowUpOp::DetailExpansion {
                    entity: "WB01A0002".into()
                })
            ),
            other => panic!("unexpected {:?}", other),
        }
        // not visible: left to the classifier
        assert!(matches!(
            resolve("tell me about vehicle KA01ZZ0001", &three_vehicles(), today()),
            Resolution::Unchanged
        ));
    }

    #[test]
    fn test_topic_continuation_binds_vehicle_and_report() {
        let mut session = Session::new("s", 20, 50);
        session.note_entities(
            crate::context::TopicEntities::default()
                .with(EntityKind::Vehicle, "AB12CD3456")
                .with(EntityKind::ReportKind, "distance report"),
        );
        match resolve("and yesterday?", &session, today()) {
            Resolution::Rewritten { utterance, .. } => {
                assert_eq!(utterance, "distance report for vehicle AB12CD3456 yesterday")
            }
            other => panic!("unexpected {:?}", other),
        }
        match resolve("what about MH12XY0001?", &session, today()) {
            Resolution::Rewritten { utterance, .. } => {
                assert_eq!(utterance, "distance report for vehicle MH12XY0001")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_topic_continuation_without_topic_asks() {
        let session = Session::new("s", 20, 50);
        assert!(matches!(
            resolve("and yesterday?", &session, today()),
            Resolution::Clarify(_)
        ));
    }

    #[test]
    fn test_reformat_requests() {
        assert!(is_reformat_request("show that as a table"));
        assert!(is_reformat_request("Format the above"));
        assert!(is_reformat_request("can you show those in a table?"));
        assert!(!is_reformat_request("show all regions"));
    }

    #[test]
    fn test_ordinal_text() {
        assert_eq!(ordinal_text(1), "1st");
        assert_eq!(ordinal_text(12), "12th");
        assert_eq!(ordinal_text(23), "23rd");
    }
}
