//! Natural-language table descriptions for embedding
//!
//! A description is the table name, lexicon expansions of its name parts,
//! the column list and a summary of what the columns hold. Distance columns
//! get a unit hint so the planner knows whether to divide by 1000.

use std::collections::BTreeSet;

/// Domain lexicon: table-name part to related words
const LEXICON: &[(&str, &str)] = &[
    ("trip", "vehicle journey travel route distance"),
    ("trips", "vehicle journey travel route distance"),
    ("vehicle", "bus car truck fleet transportation automobile"),
    ("master", "reference main primary data registry list"),
    ("driver", "operator person staff employee"),
    ("route", "path direction destination stops"),
    ("fuel", "gas diesel consumption efficiency"),
    ("maintenance", "repair service fix schedule"),
    ("alert", "notification warning event issue"),
    ("gps", "location tracking position coordinates"),
    ("report", "summary data analysis statistics"),
    ("history", "past records log archive"),
    ("status", "state condition current situation"),
    ("location", "position place coordinates"),
    ("speed", "velocity rate movement"),
    ("distance", "kilometres travel covered odometer"),
    ("util", "utilisation stoppage idle halt"),
    ("hosp", "plant facility depot"),
    ("district", "region area"),
    ("zone", "zone area territory"),
    ("crm", "customer complaint relationship"),
    ("complaint", "issue grievance ticket"),
    ("dtls", "details information records"),
    ("customer", "client buyer account"),
    ("dpr", "daily production report concrete delivery"),
    ("details", "information data records specifics"),
];

/// Unit a distance-like column is stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Kilometres,
    Metres,
}

impl DistanceUnit {
    pub fn label(self) -> &'static str {
        match self {
            DistanceUnit::Kilometres => "likely kilometers",
            DistanceUnit::Metres => "likely meters",
        }
    }
}

/// Unit guess for a column name, `None` when it is not a distance column
pub fn distance_unit(column: &str) -> Option<DistanceUnit> {
    let col = column.to_lowercase();
    let is_distance = ["distance", "km", "mile", "meter", "metre", "mileage", "odometer"]
        .iter()
        .any(|k| col.contains(k));
    if !is_distance {
        return None;
    }
    if col.contains("km") || col.contains("kilomet") || col.contains("mileage") || col.contains("odometer") {
        return Some(DistanceUnit::Kilometres);
    }
    // transportation data is stored in metres unless the name says otherwise
    Some(DistanceUnit::Metres)
}

fn column_semantics(column: &str) -> Option<&'static str> {
    let col = column.to_lowercase();
    let any = |keys: &[&str]| keys.iter().any(|k| col.contains(k));

    if distance_unit(&col).is_some() {
        Some("distance measurement")
    } else if col == "id" || col.starts_with("id_") || col.ends_with("_id") || col.ends_with("_key") {
        Some("identifier")
    } else if any(&["name", "title", "description", "subject"]) {
        Some("name or description")
    } else if any(&["date", "time", "_tm", "timestamp", "dt_of"]) {
        Some("temporal data")
    } else if any(&["fuel"]) {
        Some("fuel consumption")
    } else if any(&["status", "state"]) {
        Some("status information")
    } else if any(&["speed", "velocity"]) {
        Some("speed measurement")
    } else if any(&["lat", "lng", "longitude", "latitude", "location"]) {
        Some("geographic coordinates")
    } else if any(&["count", "total", "sum", "amount", "vol", "cost"]) {
        Some("numerical aggregate")
    } else {
        None
    }
}

/// Compose the embedding text for a table
pub fn describe_table(name: &str, columns: &[String], reference: Option<&str>) -> String {
    let mut description = format!("Database table named {} ", name);

    let keywords: BTreeSet<&str> = name
        .to_lowercase()
        .split('_')
        .flat_map(|part| {
            LEXICON
                .iter()
                .find(|(key, _)| *key == part)
                .map(|(_, words)| words.split_whitespace().collect::<Vec<_>>())
                .unwrap_or_default()
        })
        .collect();
    let plain_parts: Vec<String> = name
        .to_lowercase()
        .split('_')
        .filter(|part| !part.is_empty() && !LEXICON.iter().any(|(key, _)| key == part))
        .map(str::to_string)
        .collect();

    if !keywords.is_empty() || !plain_parts.is_empty() {
        let mut related: Vec<String> = keywords.iter().map(|s| s.to_string()).collect();
        related.extend(plain_parts);
        description.push_str(&format!("relates to {}. ", related.join(" ")));
    }

    description.push_str(&format!("Contains data columns: {}. ", columns.join(", ")));

    let semantics: BTreeSet<&str> = columns.iter().filter_map(|c| column_semantics(c)).collect();
    if !semantics.is_empty() {
        let listed: Vec<&str> = semantics.into_iter().collect();
        description.push_str(&format!("This table stores {}.", listed.join(", ")));
    }

    let distances: Vec<String> = columns
        .iter()
        .filter_map(|c| distance_unit(c).map(|unit| format!("{} ({})", c, unit.label())))
        .collect();
    if !distances.is_empty() {
        description.push_str(&format!(" Distance columns: {}.", distances.join(", ")));
    }

    if let Some(reference) = reference {
        description.push(' ');
        description.push_str(reference.trim());
    }

    description
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_distance_unit_detection() {
        assert_eq!(distance_unit("distance"), Some(DistanceUnit::Metres));
        assert_eq!(distance_unit("trip_distance_km"), Some(DistanceUnit::Kilometres));
        assert_eq!(distance_unit("odometer"), Some(DistanceUnit::Kilometres));
        assert_eq!(distance_unit("reg_no"), None);
    }

    #[test]
    fn test_description_mentions_lexicon_and_columns() {
        let text = describe_table(
            "distance_report",
            &cols(&["reg_no", "from_tm", "distance"]),
            Some("Per-trip distance travelled."),
        );
        assert!(text.starts_with("Database table named distance_report"));
        assert!(text.contains("kilometres"));
        assert!(text.contains("Contains data columns: reg_no, from_tm, distance."));
        assert!(text.contains("distance (likely meters)"));
        assert!(text.contains("temporal data"));
        assert!(text.ends_with("Per-trip distance travelled."));
    }

    #[test]
    fn test_plain_name_parts_kept() {
        let text = describe_table("mega_trips", &cols(&["id_no"]), None);
        assert!(text.contains("mega"));
        assert!(text.contains("journey"));
        assert!(text.contains("identifier"));
    }
}
