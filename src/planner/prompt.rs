//! Prompt assembly for the LLM planner

use crate::context::Turn;
use crate::ranker::RankedTable;
use crate::schema::{distance_unit, PatternMatch, TableCatalogue};

use super::values::cheat_sheet;

pub const SYSTEM_PROMPT: &str = "You are a PostgreSQL analyst for a ready-mix concrete fleet. \
Write one read-only SELECT statement that answers the user's question using ONLY the tables listed. \
Return a JSON object {\"sql\": \"...\", \"response\": \"...\", \"follow_up\": \"...\"}. \
If the question needs no data, omit \"sql\" and answer in \"response\".\n\
Rules:\n\
- Never write INSERT, UPDATE, DELETE, DROP, ALTER, CREATE, GRANT or TRUNCATE.\n\
- Use the table aliases shown. The hierarchy is zone_master zm <- district_master dm (id_zone) <- \
hosp_master hm (id_dist) <- vehicle_master vm (id_hosp); always join every level in between.\n\
- Status columns hold codes, not words. Use the value codes below.\n\
- Distances stored in metres are shown in km with ROUND(column / 1000.0, 2).\n\
- Use ILIKE for name matches and add LIMIT 100 to row listings.";

const HISTORY_TURNS: usize = 3;

/// Schema snippet for the shortlisted tables
pub fn schema_snippet(shortlist: &[RankedTable], catalogue: &TableCatalogue) -> String {
    let mut out = String::new();
    for table in shortlist {
        let name = table.bare_name();
        let columns: Vec<String> = catalogue
            .columns(name)
            .unwrap_or_default()
            .iter()
            .map(|c| match distance_unit(c) {
                Some(unit) => format!("{} ({})", c, unit.label()),
                None => c.clone(),
            })
            .collect();
        out.push_str(&format!("- {}: {}\n", name, columns.join(", ")));
        if let Some(entry) = catalogue.get(name) {
            for hint in &entry.relationship_hints {
                out.push_str(&format!("    join: {}\n", hint));
            }
        }
    }
    out
}

/// User prompt: tables, value codes, recent turns, an optional past example
pub fn user_prompt(
    utterance: &str,
    shortlist: &[RankedTable],
    catalogue: &TableCatalogue,
    history: &[&Turn],
    example: Option<&PatternMatch>,
) -> String {
    let mut prompt = format!(
        "Tables:\n{}\nValue codes:\n{}\n",
        schema_snippet(shortlist, catalogue),
        cheat_sheet()
    );

    let recent: Vec<&&Turn> = history.iter().rev().take(HISTORY_TURNS).rev().collect();
    if !recent.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for turn in recent {
            prompt.push_str(&format!("User: {}\nAssistant: {}\n", turn.user_text, first_line(&turn.assistant_text)));
            if let Some(sql) = &turn.sql {
                prompt.push_str(&format!("SQL: {}\n", sql));
            }
        }
    }

    if let Some(example) = example {
        prompt.push_str(&format!(
            "\nA similar earlier question was \"{}\" answered with:\n{}\n",
            example.user_query, example.sql
        ));
    }

    prompt.push_str(&format!("\nQuestion: {}\n", utterance));
    prompt
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
