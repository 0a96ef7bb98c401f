//! Table Ranker
//!
//! Merges three signals into the shortlist handed to the LLM planner:
//!
//! - priority: a keyword or hierarchical phrase names the table (1.0)
//! - fuzzy: a query word is part of the table name, or the whole utterance
//!   is close to it by Ratcliff/Obershelp (weight 0.7)
//! - embedding: similarity from the schema index (weight 0.3)

pub mod priority;
pub mod similarity;

pub use priority::priority_tables;
pub use similarity::ratcliff_obershelp;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::schema::{TableCatalogue, TableMatch};

pub const PRIORITY_WEIGHT: f32 = 1.0;
pub const FUZZY_WEIGHT: f32 = 0.7;
pub const EMBEDDING_WEIGHT: f32 = 0.3;

const FUZZY_THRESHOLD: f32 = 0.6;
const SUBSTRING_SCORE: f32 = 0.9;

/// Tables superseded by newer ones; they never reach the shortlist
pub const LEGACY_TABLES: &[&str] = &[
    "vehicle_location_shifting",
    "app_regions",
    "plant_schedule",
    "plant_master",
];

pub fn is_legacy(table: &str) -> bool {
    let bare = table.rsplit('.').next().unwrap_or(table);
    LEGACY_TABLES.iter().any(|t| t.eq_ignore_ascii_case(bare))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTable {
    pub qualified_name: String,
    pub score: f32,
    pub priority: bool,
    pub fuzzy: f32,
    pub embedding: f32,
    pub description: String,
}

impl RankedTable {
    pub fn bare_name(&self) -> &str {
        self.qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.qualified_name)
    }
}

#[derive(Debug, Default)]
struct Signals {
    priority: bool,
    fuzzy: f32,
    embedding: f32,
}

#[derive(Debug, Clone)]
pub struct TableRanker {
    shortlist_k: usize,
}

impl TableRanker {
    pub fn new(shortlist_k: usize) -> Self {
        Self {
            shortlist_k: shortlist_k.max(1),
        }
    }

    pub fn shortlist_k(&self) -> usize {
        self.shortlist_k
    }

    /// Rank catalogue tables for an utterance, given the index's matches
    pub fn rank(
        &self,
        utterance: &str,
        catalogue: &TableCatalogue,
        embedding_matches: &[TableMatch],
    ) -> Vec<RankedTable> {
        let mut signals: BTreeMap<String, Signals> = BTreeMap::new();

        for table in priority_tables(utterance) {
            if let Some(entry) = catalogue.get(table) {
                signals
                    .entry(entry.qualified_name.clone())
                    .or_default()
                    .priority = true;
            }
        }

        for entry in catalogue.entries() {
            let fuzzy = fuzzy_score(utterance, &entry.name);
            if fuzzy > 0.0 {
                signals
                    .entry(entry.qualified_name.clone())
                    .or_default()
                    .fuzzy = fuzzy;
            }
        }

        for found in embedding_matches {
            if let Some(entry) = catalogue.get(&found.qualified_name) {
                let slot = &mut signals.entry(entry.qualified_name.clone()).or_default().embedding;
                *slot = slot.max(found.similarity.max(0.0));
            }
        }

        let mut ranked: Vec<RankedTable> = signals
            .into_iter()
            .filter(|(name, _)| !is_legacy(name))
            .filter_map(|(name, s)| {
                let entry = catalogue.get(&name)?;
                let score = if s.priority { PRIORITY_WEIGHT } else { 0.0 }
                    + s.fuzzy * FUZZY_WEIGHT
                    + s.embedding * EMBEDDING_WEIGHT;
                (score > 0.0).then(|| RankedTable {
                    qualified_name: name,
                    score,
                    priority: s.priority,
                    fuzzy: s.fuzzy,
                    embedding: s.embedding,
                    description: entry.description.clone(),
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.qualified_name.cmp(&b.qualified_name))
        });
        ranked.truncate(self.shortlist_k);

        debug!(
            shortlist = ?ranked.iter().map(|r| r.bare_name()).collect::<Vec<_>>(),
            "ranked tables"
        );
        ranked
    }
}

/// Substring hit scores 0.9; otherwise the Ratcliff/Obershelp ratio when it
/// clears the threshold
fn fuzzy_score(utterance: &str, table: &str) -> f32 {
    let query = utterance.to_lowercase();
    let table = table.to_lowercase();

    let substring = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| word.len() >= 3)
        .any(|word| table.contains(word));
    if substring {
        return SUBSTRING_SCORE;
    }

    let ratio = ratcliff_obershelp(&query, &table);
    if ratio >= FUZZY_THRESHOLD {
        ratio
    } else {
        0.0
    }
}
