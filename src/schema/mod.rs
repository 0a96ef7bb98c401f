//! Table catalogue and schema retrieval index
//!
//! The catalogue is built once at startup from introspection plus the bundled
//! reference document and is read-only afterwards.

pub mod description;
pub mod index;
pub mod reference;
pub mod store;

pub use description::{describe_table, distance_unit, DistanceUnit};
pub use index::{cosine_similarity, EmbeddingStats, SchemaIndex, TableMatch, PATTERN_THRESHOLD};
pub use reference::{ReferenceDoc, ReferenceTable};
pub use store::{EmbeddingStore, InMemoryEmbeddingStore, PatternMatch, StoredEmbedding};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::database::RawTable;

/// Rough table size, from the planner's row estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn from_estimate(rows: Option<i64>) -> Self {
        match rows {
            Some(n) if (0..1_000).contains(&n) => SizeClass::Small,
            Some(n) if (1_000..100_000).contains(&n) => SizeClass::Medium,
            Some(n) if n >= 100_000 => SizeClass::Large,
            // never analysed
            _ => SizeClass::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    /// `schema.table`
    pub qualified_name: String,
    pub schema: String,
    pub name: String,
    pub columns: Vec<String>,
    pub description: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub size_class: SizeClass,
    pub business_context: String,
    pub relationship_hints: Vec<String>,
}

impl TableEntry {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// All known tables, keyed by qualified name
#[derive(Debug, Clone, Default)]
pub struct TableCatalogue {
    entries: BTreeMap<String, TableEntry>,
}

impl TableCatalogue {
    /// Combine introspected tables with the reference document
    pub fn build(raw: Vec<RawTable>, reference: &ReferenceDoc) -> Self {
        let entries = raw
            .into_iter()
            .map(|table| {
                let known = reference.table(&table.name);
                let entry = TableEntry {
                    qualified_name: format!("{}.{}", table.schema, table.name),
                    description: describe_table(
                        &table.name,
                        &table.columns,
                        known.map(|r| r.description.as_str()),
                    ),
                    size_class: SizeClass::from_estimate(table.row_estimate),
                    business_context: known
                        .map(|r| r.business_context.clone())
                        .unwrap_or_else(|| "general".to_string()),
                    relationship_hints: known.map(|r| r.relationships.clone()).unwrap_or_default(),
                    schema: table.schema,
                    name: table.name,
                    columns: table.columns,
                    embedding: None,
                };
                (entry.qualified_name.clone(), entry)
            })
            .collect();
        Self { entries }
    }

    /// Catalogue of the reference tables alone, for use without introspection
    pub fn from_reference(reference: &ReferenceDoc) -> Self {
        let raw = reference
            .tables
            .iter()
            .map(|(name, table)| RawTable {
                schema: "public".to_string(),
                name: name.clone(),
                columns: table.columns.clone(),
                row_estimate: None,
            })
            .collect();
        Self::build(raw, reference)
    }

    pub fn bundled() -> Result<Self, serde_yaml::Error> {
        Ok(Self::from_reference(&ReferenceDoc::bundled()?))
    }

    /// Look up by `schema.table` or bare table name
    pub fn get(&self, name: &str) -> Option<&TableEntry> {
        let name = name.trim().to_lowercase();
        if let Some(entry) = self.entries.get(&name) {
            return Some(entry);
        }
        let bare = name.rsplit('.').next().unwrap_or(&name);
        self.entries.values().find(|e| e.name.eq_ignore_ascii_case(bare))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.get(table).map(|e| e.columns.as_slice())
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.get(table).map(|e| e.has_column(column)).unwrap_or(false)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TableEntry> {
        self.entries.values()
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut TableEntry> {
        self.entries.values_mut()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
