//! Guard for LLM-written SQL
//!
//! The statement must parse as a single read-only query, stay inside the
//! table shortlist, join every hierarchy level between the ones it names on
//! its foreign key and reference only catalogue columns.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{
    BinaryOperator, Expr, JoinConstraint, JoinOperator, ObjectName, Query, Select, SelectItem,
    SetExpr, Statement, TableFactor, Visit, Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::schema::TableCatalogue;

use super::hierarchy::{missing_levels, Level};

static FORBIDDEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|GRANT|TRUNCATE)\b")
        .expect("valid regex")
});
static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid regex"));

/// Columns listed in an unknown-column message
const AVAILABLE_PREVIEW: usize = 12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("forbidden keyword {0}")]
    ForbiddenKeyword(String),

    #[error("only a single SELECT statement is allowed")]
    NotReadOnly,

    #[error("table {table} is outside the shortlist")]
    TableOutsideShortlist { table: String, shortlist: Vec<String> },

    #[error("unknown table {0}")]
    UnknownTable(String),

    #[error("no column named {column}")]
    UnknownColumn {
        column: String,
        table: Option<String>,
        available: Vec<String>,
    },

    #[error("hierarchy join skips {}", missing.join(", "))]
    IncompleteHierarchy { missing: Vec<String> },

    #[error("no join condition between {child} and {parent}")]
    UnjoinedLevels { child: String, parent: String },

    #[error("could not parse SQL: {0}")]
    Unparseable(String),
}

impl ValidationError {
    pub fn user_message(&self) -> String {
        match self {
            ValidationError::UnknownColumn {
                column,
                table,
                available,
            } => {
                let place = table
                    .as_ref()
                    .map(|t| format!(" in {}", t))
                    .unwrap_or_default();
                if available.is_empty() {
                    format!("There is no column named {}{}.", column, place)
                } else {
                    format!(
                        "There is no column named {}{}; available columns include {}.",
                        column,
                        place,
                        available.join(", ")
                    )
                }
            }
            ValidationError::TableOutsideShortlist { table, .. } | ValidationError::UnknownTable(table) => {
                format!(
                    "I couldn't build a safe query for that (it needed the {} table). Could you rephrase the question?",
                    table
                )
            }
            ValidationError::IncompleteHierarchy { missing } => format!(
                "I couldn't link those records correctly (the {} level was skipped). Could you rephrase the question?",
                missing.join(" and ")
            ),
            ValidationError::UnjoinedLevels { child, parent } => format!(
                "I couldn't link each {} to its {} correctly. Could you rephrase the question?",
                child, parent
            ),
            _ => "I couldn't build a safe query for that. Could you rephrase the question?"
                .to_string(),
        }
    }
}

fn bare(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.to_lowercase())
        .unwrap_or_default()
}

#[derive(Default)]
struct References {
    relations: BTreeSet<String>,
    ctes: BTreeSet<String>,
    /// alias or table name → table
    aliases: BTreeMap<String, String>,
    /// Derived-table aliases; their columns are not checked
    opaque: BTreeSet<String>,
    select_aliases: BTreeSet<String>,
    /// (qualifier, column)
    columns: Vec<(Option<String>, String)>,
    /// Qualified column pairs equated in ON clauses and WHERE conjuncts
    equalities: Vec<((String, String), (String, String))>,
}

fn qualified(expr: &Expr) -> Option<(String, String)> {
    match expr {
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => Some((
            parts[parts.len() - 2].value.to_lowercase(),
            parts[parts.len() - 1].value.to_lowercase(),
        )),
        Expr::Nested(inner) => qualified(inner),
        _ => None,
    }
}

fn join_condition(operator: &JoinOperator) -> Option<&Expr> {
    match operator {
        JoinOperator::Inner(JoinConstraint::On(expr))
        | JoinOperator::LeftOuter(JoinConstraint::On(expr))
        | JoinOperator::RightOuter(JoinConstraint::On(expr))
        | JoinOperator::FullOuter(JoinConstraint::On(expr)) => Some(expr),
        _ => None,
    }
}

fn selects(body: &SetExpr) -> Vec<&Select> {
    match body {
        SetExpr::Select(select) => vec![select.as_ref()],
        SetExpr::SetOperation { left, right, .. } => {
            let mut all = selects(left);
            all.extend(selects(right));
            all
        }
        SetExpr::Query(query) => selects(&query.body),
        _ => Vec::new(),
    }
}

impl References {
    fn conjuncts(&mut self, expr: &Expr) {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.conjuncts(left);
                self.conjuncts(right);
            }
            Expr::Nested(inner) => self.conjuncts(inner),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                if let (Some(a), Some(b)) = (qualified(left), qualified(right)) {
                    self.equalities.push((a, b));
                }
            }
            // vm.id_hosp IN (SELECT hm.id_no FROM hosp_master hm ...)
            Expr::InSubquery {
                expr,
                subquery,
                negated: false,
            } => {
                let Some(a) = qualified(expr) else { return };
                if let SetExpr::Select(select) = subquery.body.as_ref() {
                    if let [SelectItem::UnnamedExpr(item) | SelectItem::ExprWithAlias { expr: item, .. }] =
                        select.projection.as_slice()
                    {
                        if let Some(b) = qualified(item) {
                            self.equalities.push((a, b));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn names(&self, (qualifier, column): &(String, String), table: &str, key: &str) -> bool {
        column == key && self.aliases.get(qualifier).map(String::as_str) == Some(table)
    }

    /// Whether `child.key = parent.id_no` holds somewhere in the query
    fn joins(&self, child: Level, key: &str, parent: Level) -> bool {
        self.equalities.iter().any(|(a, b)| {
            (self.names(a, child.table(), key) && self.names(b, parent.table(), "id_no"))
                || (self.names(b, child.table(), key) && self.names(a, parent.table(), "id_no"))
        })
    }
}

/// First adjacent pair of levels present in `tables` with no join predicate
fn unjoined_levels(refs: &References, tables: &BTreeSet<String>) -> Option<(Level, Level)> {
    Level::LEAF_TO_ROOT.into_iter().find_map(|child| {
        let (key, parent) = child.parent_key()?;
        let both = tables.contains(child.table()) && tables.contains(parent.table());
        (both && !refs.joins(child, key, parent)).then_some((child, parent))
    })
}

impl Visitor for References {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        if let SetExpr::Select(select) = query.body.as_ref() {
            for item in &select.projection {
                if let SelectItem::ExprWithAlias { alias, .. } = item {
                    self.select_aliases.insert(alias.value.to_lowercase());
                }
            }
        }
        for select in selects(&query.body) {
            for from in &select.from {
                for join in &from.joins {
                    if let Some(condition) = join_condition(&join.join_operator) {
                        self.conjuncts(condition);
                    }
                }
            }
            if let Some(selection) = &select.selection {
                self.conjuncts(selection);
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        self.relations.insert(bare(relation));
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = bare(name);
                if let Some(alias) = alias {
                    self.aliases.insert(alias.name.value.to_lowercase(), table.clone());
                }
                self.aliases.insert(table.clone(), table);
            }
            TableFactor::Derived {
                alias: Some(alias), ..
            } => {
                self.opaque.insert(alias.name.value.to_lowercase());
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        match expr {
            Expr::Identifier(ident) => self.columns.push((None, ident.value.to_lowercase())),
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                let column = parts[parts.len() - 1].value.to_lowercase();
                let qualifier = parts[parts.len() - 2].value.to_lowercase();
                self.columns.push((Some(qualifier), column));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

impl References {
    fn tables(&self) -> BTreeSet<String> {
        self.relations.difference(&self.ctes).cloned().collect()
    }
}

fn parse(sql: &str) -> Result<Vec<Statement>, ValidationError> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| ValidationError::Unparseable(e.to_string()))?;
    if statements.len() != 1 || !matches!(statements[0], Statement::Query(_)) {
        return Err(ValidationError::NotReadOnly);
    }
    Ok(statements)
}

fn collect(sql: &str) -> Result<References, ValidationError> {
    let statements = parse(sql)?;
    let mut refs = References::default();
    let _ = statements.visit(&mut refs);
    Ok(refs)
}

/// Bare table names a query reads from, CTE names excluded
pub fn referenced_tables(sql: &str) -> Result<Vec<String>, ValidationError> {
    Ok(collect(sql)?.tables().into_iter().collect())
}

/// First write verb outside string literals
pub fn forbidden_keyword(sql: &str) -> Option<String> {
    let stripped = STRING_LITERAL.replace_all(sql, "''");
    FORBIDDEN
        .captures(&stripped)
        .map(|caps| caps[1].to_uppercase())
}

/// Validate LLM SQL; returns the tables it reads
pub fn validate_sql(
    sql: &str,
    catalogue: &TableCatalogue,
    shortlist: &BTreeSet<String>,
) -> Result<BTreeSet<String>, ValidationError> {
    if let Some(keyword) = forbidden_keyword(sql) {
        return Err(ValidationError::ForbiddenKeyword(keyword));
    }
    let refs = collect(sql)?;
    let tables = refs.tables();

    for table in &tables {
        if !shortlist.contains(table) {
            return Err(ValidationError::TableOutsideShortlist {
                table: table.clone(),
                shortlist: shortlist.iter().cloned().collect(),
            });
        }
        if !catalogue.is_empty() && !catalogue.contains(table) {
            return Err(ValidationError::UnknownTable(table.clone()));
        }
    }

    let missing = missing_levels(tables.iter().map(String::as_str));
    if !missing.is_empty() {
        return Err(ValidationError::IncompleteHierarchy {
            missing: missing.iter().map(|l| l.label().to_string()).collect(),
        });
    }
    if let Some((child, parent)) = unjoined_levels(&refs, &tables) {
        return Err(ValidationError::UnjoinedLevels {
            child: child.label().to_string(),
            parent: parent.label().to_string(),
        });
    }

    if !catalogue.is_empty() {
        check_columns(&refs, &tables, catalogue)?;
    }
    Ok(tables)
}

fn check_columns(
    refs: &References,
    tables: &BTreeSet<String>,
    catalogue: &TableCatalogue,
) -> Result<(), ValidationError> {
    for (qualifier, column) in &refs.columns {
        match qualifier {
            Some(q) if refs.opaque.contains(q) || refs.ctes.contains(q) => {}
            Some(q) => {
                let Some(table) = refs.aliases.get(q) else {
                    return Err(ValidationError::UnknownColumn {
                        column: format!("{}.{}", q, column),
                        table: None,
                        available: Vec::new(),
                    });
                };
                if refs.ctes.contains(table) {
                    continue;
                }
                if !catalogue.has_column(table, column) {
                    return Err(ValidationError::UnknownColumn {
                        column: column.clone(),
                        table: Some(table.clone()),
                        available: catalogue
                            .columns(table)
                            .map(|c| c.iter().take(AVAILABLE_PREVIEW).cloned().collect())
                            .unwrap_or_default(),
                    });
                }
            }
            None => {
                let known = refs.select_aliases.contains(column)
                    || !refs.opaque.is_empty()
                    || !refs.ctes.is_empty()
                    || tables.iter().any(|t| catalogue.has_column(t, column));
                if !known {
                    let available: BTreeSet<String> = tables
                        .iter()
                        .filter_map(|t| catalogue.columns(t))
                        .flatten()
                        .cloned()
                        .collect();
                    return Err(ValidationError::UnknownColumn {
                        column: column.clone(),
                        table: None,
                        available: available.into_iter().take(AVAILABLE_PREVIEW).collect(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> TableCatalogue {
        TableCatalogue::bundled().unwrap()
    }

    fn shortlist(tables: &[&str]) -> BTreeSet<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_referenced_tables_skip_ctes() {
        let sql = "WITH recent AS (SELECT reg_no FROM mega_trips) \
                   SELECT r.reg_no FROM recent r JOIN vehicle_master vm ON r.reg_no = vm.reg_no";
        assert_eq!(
            referenced_tables(sql).unwrap(),
            vec!["mega_trips".to_string(), "vehicle_master".to_string()]
        );
    }

    #[test]
    fn test_rejects_writes() {
        assert_eq!(
            forbidden_keyword("DELETE FROM vehicle_master"),
            Some("DELETE".to_string())
        );
        assert_eq!(forbidden_keyword("SELECT 'Deleted' AS note, updated_at FROM t"), None);
        assert_eq!(forbidden_keyword("SELECT 'drop table' FROM t"), None);
        let err = validate_sql("DROP TABLE vehicle_master", &catalogue(), &shortlist(&["vehicle_master"]));
        assert!(matches!(err, Err(ValidationError::ForbiddenKeyword(_))));
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let err = validate_sql(
            "SELECT 1; SELECT 2",
            &TableCatalogue::default(),
            &BTreeSet::new(),
        );
        assert_eq!(err, Err(ValidationError::NotReadOnly));
    }

    #[test]
    fn test_rejects_table_outside_shortlist() {
        let err = validate_sql(
            "SELECT vm.reg_no FROM vehicle_master vm",
            &catalogue(),
            &shortlist(&["mega_trips"]),
        );
        assert!(matches!(
            err,
            Err(ValidationError::TableOutsideShortlist { ref table, .. }) if table == "vehicle_master"
        ));
    }

    #[test]
    fn test_rejects_skipped_hierarchy_level() {
        let sql = "SELECT vm.reg_no, dm.name FROM vehicle_master vm \
                   JOIN district_master dm ON vm.id_hosp = dm.id_no";
        let err = validate_sql(
            sql,
            &catalogue(),
            &shortlist(&["vehicle_master", "district_master", "hosp_master"]),
        );
        assert_eq!(
            err,
            Err(ValidationError::IncompleteHierarchy {
                missing: vec!["plant".to_string()]
            })
        );
    }

    #[test]
    fn test_rejects_cross_join_of_hierarchy() {
        let tables = shortlist(&["vehicle_master", "hosp_master", "district_master"]);
        let err = validate_sql(
            "SELECT vm.reg_no, dm.name FROM vehicle_master vm, hosp_master hm, district_master dm",
            &catalogue(),
            &tables,
        );
        assert_eq!(
            err,
            Err(ValidationError::UnjoinedLevels {
                child: "vehicle".to_string(),
                parent: "plant".to_string(),
            })
        );

        // one link present, the other missing
        let err = validate_sql(
            "SELECT vm.reg_no, dm.name FROM vehicle_master vm \
             JOIN hosp_master hm ON vm.id_hosp = hm.id_no CROSS JOIN district_master dm",
            &catalogue(),
            &tables,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnjoinedLevels { ref child, .. } if child == "plant"));
        assert!(err.user_message().contains("plant to its region"));
    }

    #[test]
    fn test_join_predicate_on_wrong_column_rejected() {
        let err = validate_sql(
            "SELECT vm.reg_no, hm.name FROM vehicle_master vm JOIN hosp_master hm ON vm.id_no = hm.id_no",
            &catalogue(),
            &shortlist(&["vehicle_master", "hosp_master"]),
        );
        assert!(matches!(err, Err(ValidationError::UnjoinedLevels { .. })));
    }

    #[test]
    fn test_join_predicate_accepted_from_where_and_subquery() {
        let tables = shortlist(&["vehicle_master", "hosp_master", "district_master", "zone_master"]);
        let comma = "SELECT vm.reg_no, zm.zone_name \
                     FROM vehicle_master vm, hosp_master hm, district_master dm, zone_master zm \
                     WHERE hm.id_no = vm.id_hosp AND (hm.id_dist = dm.id_no) \
                     AND dm.id_zone = zm.id_no AND vm.reg_no LIKE 'MH%'";
        assert_eq!(validate_sql(comma, &catalogue(), &tables).unwrap().len(), 4);

        let nested = "SELECT vm.reg_no FROM vehicle_master vm WHERE vm.id_hosp IN \
                      (SELECT hm.id_no FROM hosp_master hm WHERE hm.name = 'Wagholi')";
        assert!(validate_sql(nested, &catalogue(), &tables).is_ok());

        // an equality under OR does not link every row
        let either = "SELECT vm.reg_no FROM vehicle_master vm, hosp_master hm \
                      WHERE vm.id_hosp = hm.id_no OR vm.reg_no = 'MH12AB0001'";
        assert!(validate_sql(either, &catalogue(), &tables).is_err());
    }

    #[test]
    fn test_unknown_column_lists_available() {
        let err = validate_sql(
            "SELECT vm.colour FROM vehicle_master vm",
            &catalogue(),
            &shortlist(&["vehicle_master"]),
        )
        .unwrap_err();
        match &err {
            ValidationError::UnknownColumn {
                column, available, ..
            } => {
                assert_eq!(column, "colour");
                assert!(available.iter().any(|c| c == "reg_no"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.user_message().contains("available columns include"));
    }

    #[test]
    fn test_accepts_valid_join_with_aliases() {
        let sql = "SELECT vm.reg_no, hm.name AS plant_name FROM vehicle_master vm \
                   JOIN hosp_master hm ON vm.id_hosp = hm.id_no ORDER BY plant_name";
        let tables = validate_sql(
            sql,
            &catalogue(),
            &shortlist(&["vehicle_master", "hosp_master"]),
        )
        .unwrap();
        assert_eq!(tables.len(), 2);
    }
}
