//! Bundled database reference document

use std::collections::BTreeMap;

use serde::Deserialize;

static REFERENCE_YAML: &str = include_str!("reference.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceDoc {
    pub tables: BTreeMap<String, ReferenceTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceTable {
    #[serde(default)]
    pub alias: Option<String>,
    pub business_context: String,
    pub description: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<String>,
}

impl ReferenceDoc {
    /// Parse the document compiled into the crate
    pub fn bundled() -> Result<Self, serde_yaml::Error> {
        Self::parse(REFERENCE_YAML)
    }

    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn table(&self, name: &str) -> Option<&ReferenceTable> {
        self.tables.get(&name.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_reference_parses() {
        let doc = ReferenceDoc::bundled().unwrap();
        let vehicles = doc.table("vehicle_master").unwrap();
        assert_eq!(vehicles.alias.as_deref(), Some("vm"));
        assert!(vehicles.columns.iter().any(|c| c == "reg_no"));
        assert_eq!(doc.table("crm_site_visit_dtls").unwrap().alias.as_deref(), Some("sv"));
        assert_eq!(doc.table("driver_master").unwrap().alias.as_deref(), Some("drv"));
    }
}
