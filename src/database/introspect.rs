//! Schema introspection via `information_schema` and `pg_class`

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use super::executor::{ExecutionError, RawTable, SchemaSource};

pub struct PgSchemaSource {
    pool: PgPool,
}

impl PgSchemaSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaSource for PgSchemaSource {
    async fn tables(&self) -> Result<Vec<RawTable>, ExecutionError> {
        let columns = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT c.table_schema, c.table_name, c.column_name
            FROM information_schema.columns c
            JOIN information_schema.tables t
              ON t.table_schema = c.table_schema AND t.table_name = c.table_name
            WHERE t.table_type = 'BASE TABLE'
              AND c.table_schema NOT IN ('pg_catalog', 'information_schema')
            ORDER BY c.table_schema, c.table_name, c.ordinal_position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExecutionError::Transient(e.to_string()))?;

        let estimates = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            SELECT n.nspname, c.relname, c.reltuples::bigint
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind = 'r'
              AND n.nspname NOT IN ('pg_catalog', 'information_schema')
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExecutionError::Transient(e.to_string()))?;

        let estimates: BTreeMap<(String, String), i64> = estimates
            .into_iter()
            .map(|(schema, table, rows)| ((schema, table), rows))
            .collect();

        let mut grouped: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for (schema, table, column) in columns {
            grouped.entry((schema, table)).or_default().push(column);
        }

        let tables: Vec<RawTable> = grouped
            .into_iter()
            .map(|((schema, name), columns)| {
                let row_estimate = estimates.get(&(schema.clone(), name.clone())).copied();
                RawTable {
                    schema,
                    name,
                    columns,
                    row_estimate,
                }
            })
            .collect();

        info!("Introspected {} tables", tables.len());
        Ok(tables)
    }
}
