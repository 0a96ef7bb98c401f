//! Topic entities: the vehicle, plant, complaint, date and report kind the
//! conversation is currently about.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Vehicle,
    Plant,
    ComplaintId,
    DateContext,
    ReportKind,
}

impl EntityKind {
    /// Result columns that carry this kind
    fn columns(self) -> &'static [&'static str] {
        match self {
            EntityKind::Vehicle => &["reg_no", "registration_number", "vehicle_reg", "vehicle"],
            EntityKind::Plant => &["plant_name", "plant"],
            EntityKind::ComplaintId => &["complaint_id"],
            EntityKind::DateContext => &["report_date", "visit_date", "trip_date", "date"],
            EntityKind::ReportKind => &[],
        }
    }

    pub fn all() -> [EntityKind; 5] {
        [
            EntityKind::Vehicle,
            EntityKind::Plant,
            EntityKind::ComplaintId,
            EntityKind::DateContext,
            EntityKind::ReportKind,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicEntities(BTreeMap<EntityKind, String>);

impl TopicEntities {
    pub fn get(&self, kind: EntityKind) -> Option<&str> {
        self.0.get(&kind).map(String::as_str)
    }

    pub fn set(&mut self, kind: EntityKind, value: impl Into<String>) {
        let value = value.into();
        if !value.trim().is_empty() {
            self.0.insert(kind, value);
        }
    }

    pub fn with(mut self, kind: EntityKind, value: impl Into<String>) -> Self {
        self.set(kind, value);
        self
    }

    /// Newer values overwrite older values of the same kind
    pub fn merge(&mut self, newer: TopicEntities) {
        self.0.extend(newer.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Entities implied by a result set.
///
/// A kind is bound only when its column holds exactly one distinct non-null
/// value; a list of twenty vehicles does not make any one of them the topic.
pub fn derive_entities(columns: &[String], rows: &[Row]) -> TopicEntities {
    let mut entities = TopicEntities::default();
    if rows.is_empty() {
        return entities;
    }

    for kind in EntityKind::all() {
        let Some(index) = columns.iter().position(|c| {
            kind.columns()
                .iter()
                .any(|candidate| c.eq_ignore_ascii_case(candidate))
        }) else {
            continue;
        };

        let distinct: BTreeSet<String> = rows
            .iter()
            .filter_map(|row| row.get(index))
            .filter_map(cell_text)
            .collect();

        if distinct.len() == 1 {
            if let Some(value) = distinct.into_iter().next() {
                entities.set(kind, value);
            }
        }
    }
    entities
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_vehicle_becomes_topic() {
        let rows = vec![vec![json!("ABC-123"), json!("Kolkata Plant")]];
        let entities = derive_entities(&cols(&["reg_no", "plant_name"]), &rows);
        assert_eq!(entities.get(EntityKind::Vehicle), Some("ABC-123"));
        assert_eq!(entities.get(EntityKind::Plant), Some("Kolkata Plant"));
    }

    #[test]
    fn test_many_vehicles_bind_nothing() {
        let rows = vec![
            vec![json!("ABC-123"), json!("Kolkata Plant")],
            vec![json!("XYZ-001"), json!("Kolkata Plant")],
        ];
        let entities = derive_entities(&cols(&["reg_no", "plant_name"]), &rows);
        assert_eq!(entities.get(EntityKind::Vehicle), None);
        // every row shares the plant
        assert_eq!(entities.get(EntityKind::Plant), Some("Kolkata Plant"));
    }

    #[test]
    fn test_merge_overwrites_same_kind() {
        let mut current = TopicEntities::default()
            .with(EntityKind::Vehicle, "ABC-123")
            .with(EntityKind::ComplaintId, "42");
        current.merge(TopicEntities::default().with(EntityKind::Vehicle, "XYZ-001"));
        assert_eq!(current.get(EntityKind::Vehicle), Some("XYZ-001"));
        assert_eq!(current.get(EntityKind::ComplaintId), Some("42"));
    }

    #[test]
    fn test_numeric_complaint_id() {
        let rows = vec![vec![json!(1042), json!("Open")]];
        let entities = derive_entities(&cols(&["complaint_id", "final_status"]), &rows);
        assert_eq!(entities.get(EntityKind::ComplaintId), Some("1042"));
    }
}
