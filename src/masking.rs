//! Rewrite & Masking Layer
//!
//! Runs on every statement before execution and on every result after it:
//!
//! 1. enumeration literals are checked against their value domain, and
//!    words are replaced by codes
//! 2. region and plant name columns in the projection are wrapped so stored
//!    placeholder values render as "Inactive Region" / "Removed Facility"
//! 3. vehicle rows get a synthesised status column when none was selected
//! 4. after execution, rows of removed devices are replaced by a notice and
//!    any remaining sensitive cell is masked
//!
//! Every step is idempotent.

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use sqlparser::ast::{
    visit_expressions, Expr, GroupByExpr, Ident, SelectItem, SetExpr, Statement as SqlStatement,
    TableFactor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::database::{QueryRows, Statement};
use crate::error::{PipelineError, Result};
use crate::planner::values::ValueDomain;

pub const INACTIVE_REGION: &str = "Inactive Region";
pub const REMOVED_FACILITY: &str = "Removed Facility";
pub const STATUS_COLUMN: &str = "vehicle_status";
pub const DEVICE_REMOVED: &str = "Device Removed";

static ENUM_COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b((?:[a-z_][a-z0-9_]*\.)?(?:active_status|complaint_status|complaint_category_id|product_correction|[a-z_]+_action_status))(\s*(?:=|!=|<>)\s*)'([^']*)'",
    )
    .expect("valid regex")
});

const REG_COLUMNS: &[&str] = &["reg_no", "registration_number", "vehicle_reg", "vehicle"];
const AGGREGATES: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX", "STRING_AGG", "ARRAY_AGG"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    /// District, zone and regional names
    Region,
    /// Plant names
    Plant,
}

/// Projection expression with the placeholder values masked
pub fn mask_select(expr: &str, kind: MaskKind, literals: &[String], markers: &[String]) -> String {
    let quote = |s: &str| format!("'{}'", s.to_uppercase().replace('\'', "''"));
    match kind {
        MaskKind::Region => {
            let list: Vec<String> = literals.iter().map(|l| quote(l)).collect();
            format!(
                "CASE WHEN UPPER(TRIM({e})) IN ({l}) THEN '{m}' ELSE {e} END",
                e = expr,
                l = list.join(", "),
                m = INACTIVE_REGION
            )
        }
        MaskKind::Plant => {
            let tests: Vec<String> = markers.iter().map(|m| contains_marker(expr, m)).collect();
            format!(
                "CASE WHEN {t} THEN '{m}' ELSE {e} END",
                t = tests.join(" OR "),
                m = REMOVED_FACILITY,
                e = expr
            )
        }
    }
}

/// `UPPER(expr) LIKE '%MARKER%'`, with LIKE wildcards in the marker matched literally
fn contains_marker(expr: &str, marker: &str) -> String {
    let escaped = marker
        .to_uppercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('\'', "''");
    format!("UPPER({}) LIKE '%{}%' ESCAPE '\\'", expr, escaped)
}

/// Rows after masking, plus side-channel notices
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaskedRows {
    pub data: QueryRows,
    pub notices: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MaskingLayer {
    enabled: bool,
    hide_removed: bool,
    literals: Vec<String>,
    markers: Vec<String>,
    scrubber: Option<Regex>,
}

impl MaskingLayer {
    pub fn new(enabled: bool, hide_removed: bool, literals: Vec<String>, markers: Vec<String>) -> Self {
        let alternatives: Vec<String> = literals
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                l.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s*")
            })
            .collect();
        let scrubber = if alternatives.is_empty() {
            None
        } else {
            Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).ok()
        };
        Self {
            enabled,
            hide_removed,
            literals,
            markers,
            scrubber,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.mask_sensitive_values,
            config.hide_removed_vehicles,
            config.sensitive_literals.clone(),
            config.removed_markers.clone(),
        )
    }

    /// Value check and projection rewrite, before execution
    pub fn rewrite(&self, statement: &Statement) -> Result<Statement> {
        let sql = verify_values(&statement.sql)?;
        let sql = if self.enabled {
            self.rewrite_sql(&sql)
        } else {
            sql
        };
        Ok(Statement::new(sql, statement.params.clone()))
    }

    /// Wrap sensitive projection columns and synthesise a status column.
    /// SQL that does not parse, or needs no change, is returned as is.
    pub fn rewrite_sql(&self, sql: &str) -> String {
        let Ok(mut statements) = Parser::parse_sql(&PostgreSqlDialect {}, sql) else {
            return sql.to_string();
        };
        let [SqlStatement::Query(query)] = statements.as_mut_slice() else {
            return sql.to_string();
        };
        let SetExpr::Select(select) = query.body.as_mut() else {
            return sql.to_string();
        };

        let mut aliases: BTreeMap<String, String> = BTreeMap::new();
        for from in &select.from {
            for factor in std::iter::once(&from.relation).chain(from.joins.iter().map(|j| &j.relation)) {
                if let TableFactor::Table { name, alias, .. } = factor {
                    let table = name.0.last().map(|i| i.value.to_lowercase()).unwrap_or_default();
                    if let Some(alias) = alias {
                        aliases.insert(alias.name.value.to_lowercase(), table.clone());
                    }
                    aliases.insert(table.clone(), table);
                }
            }
        }
        let alias_of = |table: &str| {
            aliases
                .iter()
                .find(|(a, t)| t.as_str() == table && a.as_str() != table)
                .or_else(|| aliases.iter().find(|(_, t)| t.as_str() == table))
                .map(|(a, _)| a.clone())
        };

        let mut changed = false;
        let mut renamed: Vec<(String, Ident)> = Vec::new();
        for item in select.projection.iter_mut() {
            let (expr, output) = match item {
                SelectItem::UnnamedExpr(expr) => (expr.clone(), None),
                SelectItem::ExprWithAlias { expr, alias } => (expr.clone(), Some(alias.clone())),
                _ => continue,
            };
            let Some((kind, column)) = maskable(&expr, &aliases) else {
                continue;
            };
            let masked = mask_select(&expr.to_string(), kind, &self.literals, &self.markers);
            let Some(new_expr) = parse_expr(&masked) else {
                continue;
            };
            let alias = output.unwrap_or_else(|| Ident::new(column));
            renamed.push((expr.to_string(), alias.clone()));
            *item = SelectItem::ExprWithAlias {
                expr: new_expr,
                alias,
            };
            changed = true;
        }

        let has_status = select.projection.iter().any(|item| match item {
            SelectItem::ExprWithAlias { alias, .. } => alias.value.to_lowercase().contains("status"),
            SelectItem::UnnamedExpr(Expr::Identifier(i)) => i.value.to_lowercase().contains("status"),
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => parts
                .last()
                .map_or(false, |i| i.value.to_lowercase().contains("status")),
            _ => false,
        });
        let grouped = match &select.group_by {
            GroupByExpr::All(_) => true,
            GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
        };
        let vehicle = alias_of("vehicle_master");
        let plant = alias_of("hosp_master");

        if let (Some(_), Some(plant)) = (&vehicle, &plant) {
            if !has_status && !grouped && !has_aggregate(&select.projection) {
                let region = alias_of("district_master");
                if let Some(status) = parse_expr(&self.status_case(plant, region.as_deref())) {
                    select.projection.push(SelectItem::ExprWithAlias {
                        expr: status,
                        alias: Ident::new(STATUS_COLUMN),
                    });
                    changed = true;
                }
            }
        }

        // ORDER BY on a wrapped column must name the output alias: under
        // DISTINCT Postgres only sorts by projected expressions
        if let Some(order_by) = query.order_by.as_mut() {
            for item in order_by.exprs.iter_mut() {
                let key = item.expr.to_string();
                if let Some((_, alias)) = renamed.iter().find(|(e, _)| e.eq_ignore_ascii_case(&key)) {
                    item.expr = Expr::Identifier(alias.clone());
                    changed = true;
                }
            }
        }

        if !changed {
            return sql.to_string();
        }
        let rewritten = statements[0].to_string();
        debug!(sql = %rewritten, "masking rewrite applied");
        rewritten
    }

    fn status_case(&self, plant_alias: &str, region_alias: Option<&str>) -> String {
        let plant_name = format!("{}.name", plant_alias);
        let removed: Vec<String> = self
            .markers
            .iter()
            .map(|m| contains_marker(&plant_name, m))
            .collect();
        let mut case = format!("CASE WHEN {} THEN '{}'", removed.join(" OR "), DEVICE_REMOVED);
        if let Some(region) = region_alias {
            let list: Vec<String> = self
                .literals
                .iter()
                .map(|l| format!("'{}'", l.to_uppercase().replace('\'', "''")))
                .collect();
            if !list.is_empty() {
                case.push_str(&format!(
                    " WHEN UPPER(TRIM({}.name)) IN ({}) THEN 'Inactive'",
                    region,
                    list.join(", ")
                ));
            }
        }
        case.push_str(" ELSE 'Active' END");
        case
    }

    /// Drop removed-device vehicle rows (with a notice) and mask sensitive cells
    pub fn mask_rows(&self, data: QueryRows) -> MaskedRows {
        if !self.enabled {
            return MaskedRows {
                data,
                notices: Vec::new(),
            };
        }
        let reg_index = REG_COLUMNS.iter().find_map(|c| data.column_index(c));
        let status_index = data.column_index(STATUS_COLUMN);
        let plant_indexes: Vec<usize> = data
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| is_plant_column(c))
            .map(|(i, _)| i)
            .collect();
        // rows stand for vehicles only when the result carries a vehicle column;
        // a plain plant listing keeps its rows and masks the name in place
        let vehicle_rows = reg_index.is_some() || status_index.is_some();

        let mut notices: Vec<String> = Vec::new();
        let mut rows = Vec::with_capacity(data.rows.len());
        for mut row in data.rows {
            let removed = status_index
                .and_then(|i| row.get(i))
                .and_then(Value::as_str)
                .map_or(false, |s| s == DEVICE_REMOVED)
                || plant_indexes.iter().any(|i| {
                    row.get(*i)
                        .and_then(Value::as_str)
                        .map_or(false, |s| s == REMOVED_FACILITY || self.has_marker(s))
                });

            if removed && vehicle_rows && self.hide_removed {
                let notice = match reg_index.and_then(|i| row.get(i)).and_then(Value::as_str) {
                    Some(reg) => format!("Vehicle {}'s device has been removed.", reg),
                    None => "A vehicle's device has been removed.".to_string(),
                };
                if !notices.contains(&notice) {
                    notices.push(notice);
                }
                continue;
            }

            for cell in row.iter_mut() {
                if let Value::String(s) = cell {
                    if self.is_sensitive(s) {
                        *s = INACTIVE_REGION.to_string();
                    } else if self.has_marker(s) {
                        *s = REMOVED_FACILITY.to_string();
                    }
                }
            }
            rows.push(row);
        }

        MaskedRows {
            data: QueryRows::new(data.columns, rows),
            notices,
        }
    }

    /// Assistant text with sensitive literal variants replaced
    pub fn scrub_text(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        let scrubbed = match &self.scrubber {
            Some(re) => re.replace_all(text, INACTIVE_REGION).into_owned(),
            None => text.to_string(),
        };
        self.markers.iter().fold(scrubbed, |acc, marker| {
            replace_case_insensitive(&acc, marker, REMOVED_FACILITY)
        })
    }

    fn is_sensitive(&self, value: &str) -> bool {
        let v = value.trim();
        self.literals.iter().any(|l| l.eq_ignore_ascii_case(v))
    }

    fn has_marker(&self, value: &str) -> bool {
        let upper = value.to_uppercase();
        self.markers.iter().any(|m| upper.contains(&m.to_uppercase()))
    }
}

/// Check enumeration literals; words with a known code are replaced by it
pub fn verify_values(sql: &str) -> Result<String> {
    let mut failure: Option<PipelineError> = None;
    let rewritten = ENUM_COMPARISON.replace_all(sql, |caps: &Captures<'_>| {
        let column = &caps[1];
        let value = &caps[3];
        let Some(domain) = ValueDomain::for_column(column) else {
            return caps[0].to_string();
        };
        if value.is_empty() || domain.is_code(value) {
            return caps[0].to_string();
        }
        match domain.map_word(value) {
            Some(code) => format!("{}{}'{}'", column, &caps[2], code),
            None => {
                if failure.is_none() {
                    failure = Some(PipelineError::ValueDomain {
                        column: column.rsplit('.').next().unwrap_or(column).to_string(),
                        word: value.to_string(),
                        accepted: domain.accepted_words(),
                    });
                }
                caps[0].to_string()
            }
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(rewritten.into_owned()),
    }
}

fn maskable(expr: &Expr, aliases: &BTreeMap<String, String>) -> Option<(MaskKind, String)> {
    let (table, column) = match expr {
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let qualifier = parts[parts.len() - 2].value.to_lowercase();
            (
                aliases.get(&qualifier)?.clone(),
                parts[parts.len() - 1].value.to_lowercase(),
            )
        }
        Expr::Identifier(ident) => {
            let column = ident.value.to_lowercase();
            let owners: Vec<&String> = aliases
                .values()
                .filter(|t| kind_of(t, &column).is_some())
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            match owners.as_slice() {
                [only] => ((*only).clone(), column),
                _ => return None,
            }
        }
        _ => return None,
    };
    kind_of(&table, &column).map(|kind| (kind, column))
}

fn kind_of(table: &str, column: &str) -> Option<MaskKind> {
    match (table, column) {
        ("district_master", "name") | ("zone_master", "zone_name") | ("vehicle_master", "regional_name") => {
            Some(MaskKind::Region)
        }
        ("hosp_master", "name") => Some(MaskKind::Plant),
        _ => None,
    }
}

fn has_aggregate(projection: &[SelectItem]) -> bool {
    projection.iter().any(|item| {
        visit_expressions(item, |expr: &Expr| match expr {
            Expr::Function(f)
                if AGGREGATES.contains(&f.name.to_string().to_uppercase().as_str()) =>
            {
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(()),
        })
        .is_break()
    })
}

fn parse_expr(sql: &str) -> Option<Expr> {
    Parser::new(&PostgreSqlDialect {})
        .try_with_sql(sql)
        .ok()?
        .parse_expr()
        .ok()
}

fn is_plant_column(column: &str) -> bool {
    let c = column.to_lowercase();
    matches!(c.as_str(), "plant" | "plant_name" | "assigned_plant" | "hosp_name" | "depot")
}

fn replace_case_insensitive(text: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return text.to_string();
    }
    match Regex::new(&format!("(?i){}", regex::escape(needle))) {
        Ok(re) => re.replace_all(text, replacement).into_owned(),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer() -> MaskingLayer {
        MaskingLayer::from_config(&PipelineConfig::default())
    }

    #[test]
    fn test_region_projection_is_wrapped() {
        let sql = "SELECT vm.reg_no, dm.name AS region_name FROM vehicle_master vm \
                   JOIN hosp_master hm ON vm.id_hosp = hm.id_no \
                   JOIN district_master dm ON hm.id_dist = dm.id_no WHERE vm.reg_no = $1";
        let out = layer().rewrite_sql(sql);
        assert!(out.contains("'Inactive Region'"), "{}", out);
        assert!(out.contains("AS region_name"));
        assert!(out.contains("AS vehicle_status"));
        assert!(out.contains("$1"));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let sql = "SELECT hm.name AS plant_name, vm.reg_no FROM vehicle_master vm \
                   JOIN hosp_master hm ON vm.id_hosp = hm.id_no";
        let layer = layer();
        let once = layer.rewrite_sql(sql);
        assert_ne!(once, sql);
        assert_eq!(layer.rewrite_sql(&once), once);
    }

    #[test]
    fn test_no_status_with_group_by() {
        let sql = "SELECT hm.name, COUNT(*) FROM vehicle_master vm \
                   JOIN hosp_master hm ON vm.id_hosp = hm.id_no GROUP BY hm.name";
        let out = layer().rewrite_sql(sql);
        assert!(!out.contains(STATUS_COLUMN));
        assert!(out.contains(REMOVED_FACILITY));
    }

    #[test]
    fn test_unrelated_sql_untouched() {
        let sql = "SELECT mt.reg_no, mt.trip_distance FROM mega_trips mt";
        assert_eq!(layer().rewrite_sql(sql), sql);
    }

    #[test]
    fn test_verify_values_maps_words_and_rejects_unknown() {
        let sql = "SELECT COUNT(*) FROM crm_complaint_dtls cd WHERE cd.active_status = 'open'";
        assert_eq!(
            verify_values(sql).unwrap(),
            "SELECT COUNT(*) FROM crm_complaint_dtls cd WHERE cd.active_status = 'Y'"
        );
        let ok = "SELECT 1 FROM crm_site_visit_dtls sv WHERE sv.cf_action_status = 'A'";
        assert_eq!(verify_values(ok).unwrap(), ok);

        let err = verify_values("SELECT 1 FROM crm_complaint_dtls WHERE active_status = 'pending'")
            .unwrap_err();
        assert!(matches!(err, PipelineError::ValueDomain { ref word, .. } if word == "pending"));
    }

    #[test]
    fn test_removed_vehicle_rows_become_notice() {
        let data = QueryRows::new(
            vec!["reg_no".into(), "plant_name".into()],
            vec![
                vec![json!("XYZ-001"), json!("EON OFFICE")],
                vec![json!("XYZ-001"), json!("EON OFFICE")],
                vec![json!("ABC-123"), json!("Wagholi")],
            ],
        );
        let masked = layer().mask_rows(data);
        assert_eq!(masked.notices, vec!["Vehicle XYZ-001's device has been removed."]);
        assert_eq!(masked.data.rows.len(), 1);
    }

    #[test]
    fn test_plant_rows_without_vehicle_column_are_kept() {
        let data = QueryRows::new(
            vec!["plant_name".into(), "plant_id".into()],
            vec![
                vec![json!(REMOVED_FACILITY), json!(3)],
                vec![json!("Pune EON_OFFICE"), json!(4)],
                vec![json!("Wagholi"), json!(7)],
            ],
        );
        let masked = layer().mask_rows(data);
        assert!(masked.notices.is_empty());
        assert_eq!(masked.data.rows.len(), 3);
        assert_eq!(masked.data.rows[0][0], json!(REMOVED_FACILITY));
        assert_eq!(masked.data.rows[1][0], json!(REMOVED_FACILITY));
        assert_eq!(masked.data.rows[2][0], json!("Wagholi"));
    }

    #[test]
    fn test_distinct_list_orders_by_output_alias() {
        let sql = "SELECT DISTINCT dm.name AS region_name, dm.id_no AS region_id \
                   FROM district_master dm WHERE dm.name IS NOT NULL ORDER BY dm.name";
        let layer = layer();
        let out = layer.rewrite_sql(sql);
        assert!(out.starts_with("SELECT DISTINCT CASE WHEN"), "{}", out);
        assert!(out.ends_with("ORDER BY region_name"), "{}", out);
        assert_eq!(layer.rewrite_sql(&out), out);

        // unaliased column: the wrapped expression takes the column name
        let sql = "SELECT DISTINCT hm.name FROM hosp_master hm ORDER BY hm.name DESC";
        let out = layer.rewrite_sql(sql);
        assert!(out.contains("END AS name"), "{}", out);
        assert!(out.ends_with("ORDER BY name DESC"), "{}", out);
    }

    #[test]
    fn test_marker_wildcards_are_escaped() {
        let layer = MaskingLayer::new(
            true,
            true,
            vec!["EONINFOTECH".into()],
            vec!["EON_OFFICE".into(), "100%".into()],
        );
        let expr = mask_select("hm.name", MaskKind::Plant, &[], &layer.markers);
        assert_eq!(
            expr,
            r"CASE WHEN UPPER(hm.name) LIKE '%EON\_OFFICE%' ESCAPE '\' OR UPPER(hm.name) LIKE '%100\%%' ESCAPE '\' THEN 'Removed Facility' ELSE hm.name END"
        );

        let sql = "SELECT vm.reg_no, hm.name AS plant_name FROM vehicle_master vm \
                   JOIN hosp_master hm ON vm.id_hosp = hm.id_no";
        let out = layer.rewrite_sql(sql);
        assert!(!out.contains("LIKE '%EON_OFFICE%'"), "{}", out);
        // projection and synthesised status both carry the escaped pattern
        assert_eq!(out.matches(r"LIKE '%EON\_OFFICE%' ESCAPE '\'").count(), 2, "{}", out);
        assert_eq!(layer.rewrite_sql(&out), out);
    }

    #[test]
    fn test_cells_masked_when_not_hiding() {
        let layer = MaskingLayer::new(
            true,
            false,
            vec!["EONINFOTECH".into()],
            vec!["EON OFFICE".into()],
        );
        let data = QueryRows::new(
            vec!["reg_no".into(), "plant_name".into(), "region_name".into()],
            vec![vec![json!("XYZ-001"), json!("EON OFFICE"), json!(" eoninfotech ")]],
        );
        let masked = layer.mask_rows(data);
        assert!(masked.notices.is_empty());
        assert_eq!(masked.data.rows[0][1], json!(REMOVED_FACILITY));
        assert_eq!(masked.data.rows[0][2], json!(INACTIVE_REGION));
    }

    #[test]
    fn test_scrub_text_variants() {
        let out = layer().scrub_text("Region EON  INFOTECH and eoninfotech at EON OFFICE");
        assert!(!out.to_uppercase().contains("EON"), "{}", out);
        assert!(out.contains(INACTIVE_REGION));
    }

    #[test]
    fn test_disabled_layer_passes_through() {
        let layer = MaskingLayer::new(false, true, vec!["EONINFOTECH".into()], vec![]);
        let data = QueryRows::new(vec!["region_name".into()], vec![vec![json!("EONINFOTECH")]]);
        assert_eq!(layer.mask_rows(data.clone()).data, data);
    }
}
