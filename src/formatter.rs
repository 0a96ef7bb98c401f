//! Result Formatter
//!
//! Turns masked rows into the chat reply. The shape depends on the row
//! count: an explanation when empty, a sentence for a single narrow row, a
//! markdown table for small results and a head plus banner for large ones.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::{QueryRows, Row};

/// Widest single row rendered as a sentence
const SENTENCE_MAX_COLUMNS: usize = 3;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("valid regex"));

/// How a plan wants its rows described
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum ResponseTemplate {
    /// Fixed sentence introducing the rows
    Lead(String),
    /// Sentence with `{n}` replaced by the row count
    RowCount(String),
    /// Sentence with `{n}` replaced by a count column of the first row
    CountCell { column: String, text: String },
    /// Sentence with `{column}` placeholders filled from the first row
    FirstRow(String),
    /// Text written by the LLM planner
    Llm(String),
}

/// What to say when a query returns nothing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyHint {
    pub what: String,
    pub subject: Option<String>,
    pub filters: Vec<String>,
}

impl EmptyHint {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            ..Default::default()
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    /// "No region recorded for the 3rd vehicle, WB01A0003 (yesterday)."
    pub fn render(&self, subject_override: Option<&str>) -> String {
        let mut text = format!("No {} recorded", self.what);
        if let Some(subject) = subject_override.or(self.subject.as_deref()) {
            text.push_str(" for ");
            text.push_str(subject);
        }
        if !self.filters.is_empty() {
            text.push_str(&format!(" ({})", self.filters.join(", ")));
        }
        text.push('.');
        text
    }
}

/// The rendered reply
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rendered {
    pub text: String,
    pub follow_up: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResultFormatter {
    table_row_limit: usize,
    display_cap: usize,
}

impl ResultFormatter {
    pub fn new(table_row_limit: usize, display_cap: usize) -> Self {
        Self {
            table_row_limit: table_row_limit.max(1),
            display_cap: display_cap.max(1),
        }
    }

    /// Render a result. `notices` come from row masking and always lead.
    pub fn render(
        &self,
        data: &QueryRows,
        response: &ResponseTemplate,
        empty: Option<&EmptyHint>,
        subject_override: Option<&str>,
        notices: &[String],
    ) -> Rendered {
        let mut parts: Vec<String> = notices.to_vec();

        if data.is_empty() {
            if parts.is_empty() {
                let text = match empty {
                    Some(hint) => hint.render(subject_override),
                    None => match subject_override {
                        Some(subject) => format!("No results found for {}.", subject),
                        None => "No results found for that question.".to_string(),
                    },
                };
                parts.push(text);
            }
            return Rendered {
                text: parts.join("\n\n"),
                follow_up: None,
            };
        }

        let first = &data.rows[0];
        match response {
            ResponseTemplate::FirstRow(text) if data.len() == 1 => {
                parts.push(fill_placeholders(text, &data.columns, first));
                return joined(parts, None);
            }
            ResponseTemplate::CountCell { column, text } => {
                let n = data
                    .column_index(column)
                    .and_then(|i| first.get(i))
                    .map(cell_text)
                    .unwrap_or_else(|| data.len().to_string());
                parts.push(text.replace("{n}", &n));
                return joined(parts, None);
            }
            _ => {}
        }

        let lead = match response {
            ResponseTemplate::Lead(text) | ResponseTemplate::Llm(text) => text.clone(),
            ResponseTemplate::RowCount(text) => text.replace("{n}", &data.len().to_string()),
            ResponseTemplate::FirstRow(_) => format!("Found {} results.", data.len()),
            ResponseTemplate::CountCell { .. } => String::new(),
        };

        if data.len() == 1 && data.columns.len() <= SENTENCE_MAX_COLUMNS {
            let sentence = row_sentence(&data.columns, first);
            parts.push(if lead.is_empty() {
                sentence
            } else {
                format!("{}\n{}", lead, sentence)
            });
            return joined(parts, None);
        }

        if !lead.is_empty() {
            parts.push(lead);
        }

        if data.len() <= self.table_row_limit {
            parts.push(markdown_table(&data.columns, &data.rows));
            return joined(parts, None);
        }

        parts.push(format!(
            "Showing the first {} of {} rows.",
            self.table_row_limit,
            data.len()
        ));
        parts.push(markdown_table(
            &data.columns,
            &data.rows[..self.table_row_limit],
        ));

        let mut follow_up = None;
        if data.len() > self.display_cap {
            parts.push(format!(
                "Only the first {} rows are kept for follow-up questions.",
                self.display_cap
            ));
            follow_up = Some(suggestions(&data.columns));
        }
        joined(parts, follow_up)
    }

    /// Re-render remembered rows without running a query
    pub fn reformat(&self, columns: &[String], rows: &[Row]) -> Rendered {
        if rows.is_empty() {
            return Rendered {
                text: "There are no results to format yet.".to_string(),
                follow_up: None,
            };
        }
        let shown = rows.len().min(self.display_cap);
        Rendered {
            text: format!(
                "Here are the previous results:\n\n{}",
                markdown_table(columns, &rows[..shown])
            ),
            follow_up: None,
        }
    }
}

fn joined(parts: Vec<String>, follow_up: Option<String>) -> Rendered {
    Rendered {
        text: parts.join("\n\n"),
        follow_up,
    }
}

fn suggestions(columns: &[String]) -> String {
    let has_date = columns.iter().any(|c| {
        let c = c.to_lowercase();
        c.contains("date") || c.contains("_tm") || c.contains("time")
    });
    if has_date {
        "Try narrowing it down with a date, for example \"for yesterday\" or \"this week\", or ask \"how many\" for a count.".to_string()
    } else {
        "Try adding a filter such as a plant or region name, or ask \"how many\" for a count."
            .to_string()
    }
}

/// Cell as display text
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) if s.trim().is_empty() => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "Yes" } else { "No" }.to_string(),
        other => other.to_string(),
    }
}

/// "plant_name" → "Plant name"
pub fn humanize(column: &str) -> String {
    let spaced = column.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn fill_placeholders(text: &str, columns: &[String], row: &Row) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .and_then(|i| row.get(i))
                .map(cell_text)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn row_sentence(columns: &[String], row: &Row) -> String {
    let parts: Vec<String> = columns
        .iter()
        .zip(row)
        .map(|(c, v)| format!("{}: {}", humanize(c), cell_text(v)))
        .collect();
    format!("{}.", parts.join(", "))
}

pub fn markdown_table(columns: &[String], rows: &[Row]) -> String {
    let escape = |s: String| s.replace('|', "\\|").replace('\n', " ");
    let mut out = String::new();
    out.push_str("| ");
    out.push_str(
        &columns
            .iter()
            .map(|c| humanize(c))
            .collect::<Vec<_>>()
            .join(" | "),
    );
    out.push_str(" |\n|");
    out.push_str(&" --- |".repeat(columns.len()));
    for row in rows {
        out.push_str("\n| ");
        out.push_str(
            &row.iter()
                .map(|v| escape(cell_text(v)))
                .collect::<Vec<_>>()
                .join(" | "),
        );
        out.push_str(" |");
    }
    out
}
