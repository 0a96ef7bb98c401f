//! Follow-up Operator
//!
//! Answers questions about the previous result ("which ones are under
//! 10000?", "how many of those", "top 5 by distance") in memory, without a
//! new query. The LLM proposes an operation descriptor; below the confidence
//! threshold, or when it fails, the pattern fallback decides.

pub mod fallback;
pub mod quantity;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::agentic::{chat_json_with_timeout, LlmClient};
use crate::context::LastResult;
use crate::database::{QueryRows, Row};
use crate::error::{PipelineError, Result};
use crate::formatter::{cell_text, humanize};
use crate::planner::llm_response::extract_json_object;

pub const CONFIDENCE_THRESHOLD: f32 = 0.6;
const COLUMN_SIMILARITY: f64 = 0.88;

const SYSTEM_PROMPT: &str = "You plan operations over a table the user has already seen. \
Reply with JSON {\"operation_type\": one of count|filter|project|aggregate|top_k|detail_expansion, \
\"parameters\": {...}, \"confidence\": 0..1}. \
filter/count parameters: {\"column\", \"operator\" (<, <=, >, >=, =, contains), \"value\"}. \
project: {\"columns\": [...]}. aggregate: {\"function\" (sum|avg|min|max), \"column\"}. \
top_k: {\"k\", \"column\", \"order\" (desc|asc)}. detail_expansion: {\"entity\"}.";

/// A follow-up referring to the previous result
#[derive(Debug, Clone, PartialEq)]
pub struct ReferentialOperation {
    pub utterance: String,
    /// Operation already identified by the resolver
    pub op: Option<FollowUpOp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl CompareOp {
    fn parse(symbol: &str) -> Option<Self> {
        match symbol.trim() {
            "<" | "lt" => Some(CompareOp::Lt),
            "<=" | "le" => Some(CompareOp::Le),
            ">" | "gt" => Some(CompareOp::Gt),
            ">=" | "ge" => Some(CompareOp::Ge),
            "=" | "==" | "eq" => Some(CompareOp::Eq),
            _ => None,
        }
    }

    fn holds(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => (left - right).abs() < f64::EPSILON,
        }
    }

    fn words(self) -> &'static str {
        match self {
            CompareOp::Lt => "under",
            CompareOp::Le => "at most",
            CompareOp::Gt => "over",
            CompareOp::Ge => "at least",
            CompareOp::Eq => "equal to",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare { column: String, op: CompareOp, value: f64 },
    /// Case-insensitive substring match, on one column or any
    Contains { column: Option<String>, text: String },
}

impl Predicate {
    fn matches(&self, columns: &[String], row: &Row) -> bool {
        match self {
            Predicate::Compare { column, op, value } => cell(columns, row, column)
                .and_then(as_number)
                .map_or(false, |v| op.holds(v, *value)),
            Predicate::Contains { column, text } => {
                let needle = text.to_lowercase();
                let hit = |v: &Value| cell_text(v).to_lowercase().contains(&needle);
                match column {
                    Some(c) => cell(columns, row, c).map_or(false, hit),
                    None => row.iter().any(hit),
                }
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Predicate::Compare { column, op, value } => {
                format!("{} {} {}", humanize(column).to_lowercase(), op.words(), format_number(*value))
            }
            Predicate::Contains { column: Some(c), text } => {
                format!("{} matching '{}'", humanize(c).to_lowercase(), text)
            }
            Predicate::Contains { column: None, text } => format!("'{}' mentioned", text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFn {
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    fn label(self) -> &'static str {
        match self {
            AggregateFn::Sum => "total",
            AggregateFn::Avg => "average",
            AggregateFn::Min => "minimum",
            AggregateFn::Max => "maximum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FollowUpOp {
    Count { predicate: Option<Predicate> },
    Filter(Predicate),
    Project { columns: Vec<String> },
    Aggregate { func: AggregateFn, column: String },
    TopK { k: usize, column: String, descending: bool },
    DetailExpansion { entity: String },
}

impl FollowUpOp {
    /// Whether the result replaces the remembered rows
    pub fn replaces_last_result(&self) -> bool {
        matches!(
            self,
            FollowUpOp::Filter(_)
                | FollowUpOp::Project { .. }
                | FollowUpOp::TopK { .. }
                | FollowUpOp::DetailExpansion { .. }
        )
    }
}

/// What a follow-up produced
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUpOutcome {
    Rows {
        data: QueryRows,
        lead: String,
        empty: String,
        replaces_last: bool,
    },
    Answer(String),
    /// Run this utterance through the main pipeline instead
    Requery(String),
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    operation_type: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    confidence: f32,
}

pub struct FollowUpOperator {
    llm: Option<Arc<dyn LlmClient>>,
    llm_timeout: Duration,
}

impl FollowUpOperator {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, llm_timeout: Duration) -> Self {
        Self { llm, llm_timeout }
    }

    /// Decide the operation for a referential utterance
    pub async fn plan(&self, reference: &ReferentialOperation, last: &LastResult) -> Result<FollowUpOp> {
        if let Some(op) = &reference.op {
            return Ok(op.clone());
        }
        if let Some(op) = self.plan_with_llm(&reference.utterance, last).await {
            return Ok(op);
        }
        fallback::plan(&reference.utterance, last).ok_or_else(|| PipelineError::ReferenceUnresolved {
            reason: "I couldn't tell what to do with the previous results.".to_string(),
            candidates: last.columns.iter().map(|c| humanize(c).to_lowercase()).collect(),
        })
    }

    async fn plan_with_llm(&self, utterance: &str, last: &LastResult) -> Option<FollowUpOp> {
        let llm = self.llm.as_ref()?;
        let sample = last
            .rows
            .first()
            .map(|row| serde_json::to_string(row).unwrap_or_default())
            .unwrap_or_default();
        let user = format!(
            "Columns: {}\nSample row: {}\nRows: {}\nQuestion: {}",
            last.columns.join(", "),
            sample,
            last.rows.len(),
            utterance
        );
        let raw = match chat_json_with_timeout(llm.as_ref(), SYSTEM_PROMPT, &user, self.llm_timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Follow-up planning fell back to patterns: {}", e);
                return None;
            }
        };
        let descriptor: Descriptor = serde_json::from_str(extract_json_object(&raw)?).ok()?;
        if descriptor.confidence < CONFIDENCE_THRESHOLD {
            debug!(confidence = descriptor.confidence, "low-confidence follow-up descriptor");
            return None;
        }
        descriptor_to_op(&descriptor, last)
    }

    /// Execute an operation over the remembered rows
    pub fn apply(&self, op: &FollowUpOp, last: &LastResult) -> FollowUpOutcome {
        let columns = &last.columns;
        let scope = if last.is_truncated() {
            format!(" (searched the first {} of {} rows)", last.rows.len(), last.total_row_count)
        } else {
            String::new()
        };

        match op {
            FollowUpOp::Count { predicate } => {
                let n = match predicate {
                    Some(p) => last.rows.iter().filter(|r| p.matches(columns, r)).count(),
                    None => last.rows.len(),
                };
                let text = match predicate {
                    Some(p) => format!("{} of the previous results have {}{}.", n, p.describe(), scope),
                    None => format!("There are {} results{}.", n, scope),
                };
                FollowUpOutcome::Answer(text)
            }
            FollowUpOp::Filter(predicate) => {
                let rows: Vec<Row> = last
                    .rows
                    .iter()
                    .filter(|r| predicate.matches(columns, r))
                    .cloned()
                    .collect();
                FollowUpOutcome::Rows {
                    lead: format!(
                        "{} of the previous {} results have {}{}:",
                        rows.len(),
                        last.rows.len(),
                        predicate.describe(),
                        scope
                    ),
                    empty: format!("None of the previous results have {}{}.", predicate.describe(), scope),
                    data: QueryRows::new(columns.clone(), rows),
                    replaces_last: true,
                }
            }
            FollowUpOp::Project { columns: wanted } => {
                let indexes: Vec<usize> = wanted
                    .iter()
                    .filter_map(|w| columns.iter().position(|c| c == w))
                    .collect();
                let rows = last
                    .rows
                    .iter()
                    .map(|r| indexes.iter().filter_map(|i| r.get(*i).cloned()).collect())
                    .collect();
                FollowUpOutcome::Rows {
                    data: QueryRows::new(indexes.iter().map(|i| columns[*i].clone()).collect(), rows),
                    lead: "Here are those columns from the previous results:".to_string(),
                    empty: "There are no previous results to show.".to_string(),
                    replaces_last: true,
                }
            }
            FollowUpOp::Aggregate { func, column } => {
                let values: Vec<f64> = last
                    .rows
                    .iter()
                    .filter_map(|r| cell(columns, r, column).and_then(as_number))
                    .collect();
                if values.is_empty() {
                    return FollowUpOutcome::Answer(format!(
                        "There are no numeric {} values in the previous results.",
                        humanize(column).to_lowercase()
                    ));
                }
                let result = match func {
                    AggregateFn::Sum => values.iter().sum(),
                    AggregateFn::Avg => values.iter().sum::<f64>() / values.len() as f64,
                    AggregateFn::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                    AggregateFn::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                };
                FollowUpOutcome::Answer(format!(
                    "The {} {} is {}{}.",
                    func.label(),
                    humanize(column).to_lowercase(),
                    format_number(result),
                    scope
                ))
            }
            FollowUpOp::TopK {
                k,
                column,
                descending,
            } => {
                let mut rows: Vec<Row> = last.rows.clone();
                rows.sort_by(|a, b| {
                    let x = cell(columns, a, column).and_then(as_number).unwrap_or(f64::NAN);
                    let y = cell(columns, b, column).and_then(as_number).unwrap_or(f64::NAN);
                    let order = x.total_cmp(&y);
                    if *descending {
                        order.reverse()
                    } else {
                        order
                    }
                });
                rows.truncate(*k);
                FollowUpOutcome::Rows {
                    lead: format!(
                        "Here are the {} {} {} by {}{}:",
                        if *descending { "top" } else { "bottom" },
                        rows.len(),
                        if rows.len() == 1 { "result" } else { "results" },
                        humanize(column).to_lowercase(),
                        scope
                    ),
                    empty: "There are no previous results to rank.".to_string(),
                    data: QueryRows::new(columns.clone(), rows),
                    replaces_last: true,
                }
            }
            FollowUpOp::DetailExpansion { entity } => detail_expansion(entity, last),
        }
    }
}

fn detail_expansion(entity: &str, last: &LastResult) -> FollowUpOutcome {
    let needle = entity.trim().to_lowercase();
    let matching: Vec<&crate::context::DisplayedItem> = last
        .displayed_items
        .iter()
        .filter(|item| {
            item.values
                .values()
                .any(|v| cell_text(v).to_lowercase() == needle)
        })
        .collect();

    if let [item] = matching.as_slice() {
        if let Some(reg) = item.text("reg_no") {
            return FollowUpOutcome::Requery(format!("show details of vehicle {}", reg));
        }
        if let Some(id) = item.text("complaint_id") {
            return FollowUpOutcome::Requery(format!("status of complaint {}", id));
        }
        if let Some(id) = item.text("plant_id") {
            return FollowUpOutcome::Requery(format!("plant id {}", id));
        }
    }

    let predicate = Predicate::Contains {
        column: None,
        text: entity.trim().to_string(),
    };
    let rows: Vec<Row> = last
        .rows
        .iter()
        .filter(|r| predicate.matches(&last.columns, r))
        .cloned()
        .collect();
    FollowUpOutcome::Rows {
        data: QueryRows::new(last.columns.clone(), rows),
        lead: format!("Here are the details for {}:", entity.trim()),
        empty: format!("{} is not in the previous results.", entity.trim()),
        replaces_last: true,
    }
}

fn descriptor_to_op(descriptor: &Descriptor, last: &LastResult) -> Option<FollowUpOp> {
    let params = &descriptor.parameters;
    let text = |key: &str| params.get(key).and_then(Value::as_str).map(str::to_string);
    let column = |key: &str| text(key).and_then(|c| resolve_column(&c, &last.columns));

    let predicate = || -> Option<Predicate> {
        let operator = text("operator")?;
        if operator.eq_ignore_ascii_case("contains") {
            return Some(Predicate::Contains {
                column: column("column"),
                text: params.get("value").map(cell_text)?,
            });
        }
        Some(Predicate::Compare {
            column: column("column")?,
            op: CompareOp::parse(&operator)?,
            value: params.get("value").and_then(as_number)?,
        })
    };

    match descriptor.operation_type.to_lowercase().as_str() {
        "count" => Some(FollowUpOp::Count {
            predicate: predicate(),
        }),
        "filter" => predicate().map(FollowUpOp::Filter),
        "project" => {
            let columns: Vec<String> = params
                .get("columns")?
                .as_array()?
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|c| resolve_column(c, &last.columns))
                .collect();
            (!columns.is_empty()).then_some(FollowUpOp::Project { columns })
        }
        "aggregate" => {
            let func = match text("function")?.to_lowercase().as_str() {
                "sum" | "total" => AggregateFn::Sum,
                "avg" | "average" | "mean" => AggregateFn::Avg,
                "min" | "minimum" => AggregateFn::Min,
                "max" | "maximum" => AggregateFn::Max,
                _ => return None,
            };
            Some(FollowUpOp::Aggregate {
                func,
                column: column("column")?,
            })
        }
        "top_k" => Some(FollowUpOp::TopK {
            k: params.get("k").and_then(Value::as_u64).unwrap_or(5) as usize,
            column: column("column")?,
            descending: !text("order").map_or(false, |o| o.eq_ignore_ascii_case("asc")),
        }),
        "detail_expansion" => Some(FollowUpOp::DetailExpansion {
            entity: text("entity")?,
        }),
        _ => None,
    }
}

fn cell<'a>(columns: &[String], row: &'a Row, column: &str) -> Option<&'a Value> {
    columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(column))
        .and_then(|i| row.get(i))
}

/// Numeric value of a cell; numeric strings count
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

fn is_id_column(column: &str) -> bool {
    let c = column.to_lowercase();
    c == "id" || c == "id_no" || c.starts_with("id_") || c.ends_with("_id") || c.ends_with("_code")
}

pub(crate) fn is_numeric_column(last: &LastResult, column: &str) -> bool {
    let mut seen = false;
    for row in &last.rows {
        match cell(&last.columns, row, column) {
            Some(Value::Null) | None => {}
            Some(v) => {
                if as_number(v).is_none() {
                    return false;
                }
                seen = true;
            }
        }
    }
    seen
}

/// First numeric column that is not an identifier
pub(crate) fn default_numeric_column(last: &LastResult) -> Option<String> {
    last.columns
        .iter()
        .find(|c| !is_id_column(c) && is_numeric_column(last, c))
        .cloned()
}

/// Column named in the utterance, by its humanised name
pub(crate) fn mentioned_column(lowered: &str, columns: &[String]) -> Option<String> {
    columns
        .iter()
        .filter(|c| {
            let human = c.replace('_', " ").to_lowercase();
            human.len() >= 3 && (lowered.contains(&human) || lowered.contains(&c.to_lowercase()))
        })
        .max_by_key(|c| c.len())
        .cloned()
}

/// Match a user's column phrase to a result column
pub fn resolve_column(phrase: &str, columns: &[String]) -> Option<String> {
    let wanted = phrase.trim().replace('_', " ").to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    if let Some(exact) = columns
        .iter()
        .find(|c| c.replace('_', " ").eq_ignore_ascii_case(&wanted))
    {
        return Some(exact.clone());
    }
    if let Some(contained) = mentioned_column(&wanted, columns) {
        return Some(contained);
    }
    columns
        .iter()
        .map(|c| (c, strsim::jaro_winkler(&wanted, &c.replace('_', " ").to_lowercase())))
        .filter(|(_, score)| *score >= COLUMN_SIMILARITY)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c.clone())
}
