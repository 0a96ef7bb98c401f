//! Postgres executor
//!
//! Every statement runs inside a `READ ONLY` transaction that is rolled back
//! afterwards, so nothing the planner emits can write.

use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Column, PgPool, Row as _, TypeInfo};
use tracing::debug;

use super::executor::{ExecutionError, QueryRows, Row, SqlExecutor, SqlParam};

pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<QueryRows, ExecutionError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        let mut query: sqlx::query::Query<'_, sqlx::Postgres, PgArguments> = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlParam::Text(s) => query.bind(s.clone()),
                SqlParam::Int(i) => query.bind(*i),
                SqlParam::Float(x) => query.bind(*x),
            };
        }

        let rows = query.fetch_all(&mut *tx).await.map_err(classify)?;
        // read-only: nothing to keep
        tx.rollback().await.map_err(classify)?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };
        let rows: Vec<Row> = rows.iter().map(decode_row).collect();
        debug!(rows = rows.len(), "statement returned");

        Ok(QueryRows { columns, rows })
    }
}

/// Map sqlx failures onto retryable / non-retryable
fn classify(err: sqlx::Error) -> ExecutionError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ExecutionError::Transient(err.to_string()),
        sqlx::Error::Database(db) => ExecutionError::Rejected(db.message().to_string()),
        _ => ExecutionError::Rejected(err.to_string()),
    }
}

fn decode_row(row: &PgRow) -> Row {
    (0..row.columns().len())
        .map(|i| decode_cell(row, i))
        .collect()
}

fn decode_cell(row: &PgRow, i: usize) -> Value {
    let type_name = row.columns()[i].type_info().name().to_uppercase();
    match type_name.as_str() {
        "INT2" => opt(row.try_get::<Option<i16>, _>(i).map(|v| v.map(Value::from))),
        "INT4" => opt(row.try_get::<Option<i32>, _>(i).map(|v| v.map(Value::from))),
        "INT8" => opt(row.try_get::<Option<i64>, _>(i).map(|v| v.map(Value::from))),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(i).map(|v| v.map(|x| Value::from(x as f64)))),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(i).map(|v| v.map(Value::from))),
        "NUMERIC" => opt(row
            .try_get::<Option<bigdecimal::BigDecimal>, _>(i)
            .map(|v| v.and_then(|d| d.to_f64()).map(Value::from))),
        "BOOL" => opt(row.try_get::<Option<bool>, _>(i).map(|v| v.map(Value::from))),
        "DATE" => opt(row
            .try_get::<Option<chrono::NaiveDate>, _>(i)
            .map(|v| v.map(|d| Value::from(d.to_string())))),
        "TIMESTAMP" => opt(row
            .try_get::<Option<chrono::NaiveDateTime>, _>(i)
            .map(|v| v.map(|d| Value::from(d.format("%Y-%m-%d %H:%M:%S").to_string())))),
        "TIMESTAMPTZ" => opt(row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
            .map(|v| v.map(|d| Value::from(d.format("%Y-%m-%d %H:%M:%S").to_string())))),
        "JSON" | "JSONB" => opt(row.try_get::<Option<Value>, _>(i)),
        "UUID" => opt(row
            .try_get::<Option<uuid::Uuid>, _>(i)
            .map(|v| v.map(|u| Value::from(u.to_string())))),
        _ => opt(row.try_get::<Option<String>, _>(i).map(|v| v.map(Value::from))),
    }
}

fn opt(decoded: Result<Option<Value>, sqlx::Error>) -> Value {
    decoded.ok().flatten().unwrap_or(Value::Null)
}
