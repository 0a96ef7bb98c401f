//! Pattern fallback for follow-up planning
//!
//! Used when no LLM is configured, when it fails, or when its confidence is
//! below the threshold.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::LastResult;

use super::quantity::find_quantity;
use super::{
    default_numeric_column, mentioned_column, resolve_column, AggregateFn, CompareOp, FollowUpOp,
    Predicate,
};

static COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(under|below|less than|fewer than|at most|over|above|more than|greater than|at least|exceeding|equal to|exactly)\b|[<>]=?",
    )
    .expect("valid regex")
});
static TOP_K: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(top|bottom|highest|lowest|largest|smallest|first)\s+(\d+)(?:\s+by\s+([a-z_ ]+?))?\s*\??$")
        .expect("valid regex")
});
static AGGREGATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(total|sum|average|avg|mean|maximum|max|highest|minimum|min|lowest)\s+(?:of\s+)?(?:the\s+)?(?:their\s+)?([a-z_][a-z_ ]*?)\s*\??$",
    )
    .expect("valid regex")
});
static PROJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:only|just)\s+(?:show|give|list|display)\s+(?:me\s+)?(?:the\s+)?(?:their\s+)?(.+?)\s*\??$")
        .expect("valid regex")
});
static HOW_MANY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bhow many\b|\bcount\b").expect("valid regex"));

fn compare_op(word: &str) -> CompareOp {
    match word {
        "under" | "below" | "less than" | "fewer than" | "<" => CompareOp::Lt,
        "at most" | "<=" => CompareOp::Le,
        "at least" | ">=" => CompareOp::Ge,
        "equal to" | "exactly" => CompareOp::Eq,
        _ => CompareOp::Gt,
    }
}

/// Numeric comparison mentioned in the utterance
fn comparison(lowered: &str, last: &LastResult) -> Option<Predicate> {
    let caps = COMPARISON.captures(lowered)?;
    let op_text = caps.get(1).map_or_else(|| caps[0].to_string(), |m| m.as_str().to_string());
    let after = &lowered[caps.get(0)?.end()..];
    let value = find_quantity(after)?;
    let column = mentioned_column(lowered, &last.columns)
        .filter(|c| super::is_numeric_column(last, c))
        .or_else(|| default_numeric_column(last))?;
    Some(Predicate::Compare {
        column,
        op: compare_op(&op_text),
        value,
    })
}

/// Text of a string cell the utterance mentions
fn value_mention(lowered: &str, last: &LastResult) -> Option<Predicate> {
    let mut best: Option<(String, String)> = None;
    for item in &last.displayed_items {
        for (column, value) in &item.values {
            let Some(text) = value.as_str() else { continue };
            let needle = text.trim().to_lowercase();
            if needle.len() < 3 || !lowered.contains(&needle) {
                continue;
            }
            if best.as_ref().map_or(true, |(_, b)| needle.len() > b.len()) {
                best = Some((column.clone(), needle));
            }
        }
    }
    best.map(|(column, text)| Predicate::Contains {
        column: Some(column),
        text,
    })
}

/// Plan a follow-up from patterns alone
pub fn plan(utterance: &str, last: &LastResult) -> Option<FollowUpOp> {
    let lowered = utterance.trim().to_lowercase();

    if HOW_MANY.is_match(&lowered) {
        let predicate = comparison(&lowered, last).or_else(|| value_mention(&lowered, last));
        return Some(FollowUpOp::Count { predicate });
    }

    if let Some(caps) = TOP_K.captures(&lowered) {
        let k: usize = caps[2].parse().ok()?;
        let column = caps
            .get(3)
            .and_then(|m| resolve_column(m.as_str(), &last.columns))
            .or_else(|| default_numeric_column(last))?;
        let descending = !matches!(&caps[1], "bottom" | "lowest" | "smallest");
        return Some(FollowUpOp::TopK {
            k,
            column,
            descending,
        });
    }

    if let Some(predicate) = comparison(&lowered, last) {
        return Some(FollowUpOp::Filter(predicate));
    }

    if let Some(caps) = AGGREGATE.captures(&lowered) {
        let func = match &caps[1] {
            "total" | "sum" => AggregateFn::Sum,
            "average" | "avg" | "mean" => AggregateFn::Avg,
            "maximum" | "max" | "highest" => AggregateFn::Max,
            _ => AggregateFn::Min,
        };
        let column = resolve_column(&caps[2], &last.columns)
            .filter(|c| super::is_numeric_column(last, c))
            .or_else(|| default_numeric_column(last))?;
        return Some(FollowUpOp::Aggregate { func, column });
    }

    if let Some(caps) = PROJECT.captures(&lowered) {
        let columns: Vec<String> = caps[1]
            .split(|c| c == ',')
            .flat_map(|part| part.split(" and "))
            .filter_map(|part| resolve_column(part.trim(), &last.columns))
            .collect();
        if !columns.is_empty() {
            return Some(FollowUpOp::Project { columns });
        }
    }

    value_mention(&lowered, last).map(FollowUpOp::Filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::QueryRows;
    use serde_json::json;

    fn trips() -> LastResult {
        LastResult::new(
            "list all trips",
            "SELECT ...",
            QueryRows::new(
                vec!["id_no".into(), "reg_no".into(), "plant_name".into(), "trip_distance".into()],
                vec![
                    vec![json!(1), json!("AB01"), json!("Wagholi"), json!(8000)],
                    vec![json!(2), json!("AB02"), json!("Hadapsar"), json!(12000)],
                    vec![json!(3), json!("AB03"), json!("Wagholi"), json!(9500)],
                ],
            ),
            50,
        )
    }

    #[test]
    fn test_under_quantity_is_filter_on_numeric_column() {
        let op = plan("which ones are under 10000?", &trips()).unwrap();
        assert_eq!(
            op,
            FollowUpOp::Filter(Predicate::Compare {
                column: "trip_distance".into(),
                op: CompareOp::Lt,
                value: 10_000.0
            })
        );
    }

    #[test]
    fn test_how_many_with_comparison() {
        let op = plan("how many of those are over 9k", &trips()).unwrap();
        assert!(matches!(
            op,
            FollowUpOp::Count {
                predicate: Some(Predicate::Compare { op: CompareOp::Gt, .. })
            }
        ));
    }

    #[test]
    fn test_top_k_by_column() {
        let op = plan("show the top 2 by trip distance", &trips()).unwrap();
        assert_eq!(
            op,
            FollowUpOp::TopK {
                k: 2,
                column: "trip_distance".into(),
                descending: true
            }
        );
    }

    #[test]
    fn test_aggregate_and_project() {
        assert_eq!(
            plan("what is the total trip distance of those", &trips()),
            Some(FollowUpOp::Aggregate {
                func: AggregateFn::Sum,
                column: "trip_distance".into()
            })
        );
        assert_eq!(
            plan("only show reg no and plant name", &trips()),
            Some(FollowUpOp::Project {
                columns: vec!["reg_no".into(), "plant_name".into()]
            })
        );
    }

    #[test]
    fn test_value_mention() {
        let op = plan("which of those are at wagholi", &trips()).unwrap();
        assert_eq!(
            op,
            FollowUpOp::Filter(Predicate::Contains {
                column: Some("plant_name".into()),
                text: "wagholi".into()
            })
        );
    }

    #[test]
    fn test_nothing_recognised() {
        assert_eq!(plan("what about those", &trips()), None);
    }
}
