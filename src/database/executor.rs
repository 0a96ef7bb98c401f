//! Query execution contract
//!
//! Rows travel as JSON values so the masking layer, formatter and follow-up
//! operator can work without knowing Postgres types.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Collaborator, PipelineError};

pub type Row = Vec<serde_json::Value>;

/// Column names plus rows, in database order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column, case-insensitive
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Bound query parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
}

impl std::fmt::Display for SqlParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlParam::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            SqlParam::Int(i) => write!(f, "{}", i),
            SqlParam::Float(x) => write!(f, "{}", x),
        }
    }
}

/// SQL text with positional (`$n`) parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// SQL with parameters inlined, for display only
    pub fn display_sql(&self) -> String {
        let mut sql = self.sql.clone();
        // highest index first so $1 does not clobber $10
        for (i, param) in self.params.iter().enumerate().rev() {
            sql = sql.replace(&format!("${}", i + 1), &param.to_string());
        }
        sql
    }
}

/// Execution failures, split by whether a retry can help
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("database rejected the query: {0}")]
    Rejected(String),

    #[error("database unavailable: {0}")]
    Transient(String),
}

static CONNECTION_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)postgres(?:ql)?://\S+").expect("valid regex"));
static HOST_DETAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(host|user|password|port)\s*=\s*"?[^\s"]+"?"#).expect("valid regex")
});

impl ExecutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }

    /// Error text with connection details removed
    pub fn sanitized_message(&self) -> String {
        let raw = match self {
            ExecutionError::Rejected(msg) | ExecutionError::Transient(msg) => msg,
        };
        let without_urls = CONNECTION_STRING.replace_all(raw, "[connection]");
        HOST_DETAIL
            .replace_all(&without_urls, "$1=[redacted]")
            .into_owned()
    }
}

/// Read-only SQL execution
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<QueryRows, ExecutionError>;
}

/// One table as reported by schema introspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<String>,
    pub row_estimate: Option<i64>,
}

/// Schema introspection
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn tables(&self) -> Result<Vec<RawTable>, ExecutionError>;
}

/// Execute with a timeout and a single retry on transient failures
pub async fn execute_with_retry(
    executor: &Arc<dyn SqlExecutor>,
    statement: &Statement,
    timeout: Duration,
) -> Result<QueryRows, PipelineError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!(attempt, sql = %statement.sql, "executing statement");
        let outcome = match tokio::time::timeout(
            timeout,
            executor.execute(&statement.sql, &statement.params),
        )
        .await
        {
            Ok(result) => result.map_err(PipelineError::from),
            Err(_) => Err(PipelineError::Timeout {
                collaborator: Collaborator::Database,
                after: timeout,
            }),
        };

        match outcome {
            Err(err) if err.is_retryable() && attempt == 1 => {
                warn!(kind = err.kind(), "Database attempt failed, retrying once: {}", err);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyExecutor {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl SqlExecutor for FlakyExecutor {
        async fn execute(
            &self,
            _sql: &str,
            _params: &[SqlParam],
        ) -> Result<QueryRows, ExecutionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ExecutionError::Transient("connection reset".to_string()))
            } else {
                Ok(QueryRows::new(
                    vec!["n".to_string()],
                    vec![vec![serde_json::json!(1)]],
                ))
            }
        }
    }

    #[tokio::test]
    async fn test_single_retry_on_transient_failure() {
        let flaky = Arc::new(FlakyExecutor {
            calls: AtomicUsize::new(0),
            failures: 1,
        });
        let executor: Arc<dyn SqlExecutor> = flaky.clone();
        let rows = execute_with_retry(&executor, &Statement::raw("SELECT 1"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_never_retries_twice() {
        let flaky = Arc::new(FlakyExecutor {
            calls: AtomicUsize::new(0),
            failures: 5,
        });
        let executor: Arc<dyn SqlExecutor> = flaky.clone();
        let err = execute_with_retry(&executor, &Statement::raw("SELECT 1"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DatabaseUnavailable(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    struct CountingExecutor {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl SqlExecutor for CountingExecutor {
        async fn execute(
            &self,
            _sql: &str,
            _params: &[SqlParam],
        ) -> Result<QueryRows, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Err(ExecutionError::Rejected("column \"colour\" does not exist".to_string()))
        }
    }

    #[tokio::test]
    async fn test_rejected_query_is_not_retried() {
        let counting = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let executor: Arc<dyn SqlExecutor> = counting.clone();
        let err = execute_with_retry(&executor, &Statement::raw("SELECT 1"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Execution(_)));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_once() {
        let counting = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(30),
        });
        let executor: Arc<dyn SqlExecutor> = counting.clone();
        let err = execute_with_retry(&executor, &Statement::raw("SELECT 1"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Timeout {
                collaborator: Collaborator::Database,
                ..
            }
        ));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sanitized_message_strips_connection_details() {
        let err = ExecutionError::Rejected(
            "could not connect to postgresql://fleet:pw@10.0.0.5:5432/fleet host=10.0.0.5"
                .to_string(),
        );
        let msg = err.sanitized_message();
        assert!(!msg.contains("pw@"));
        assert!(!msg.contains("10.0.0.5"));
        assert!(msg.contains("[connection]"));
    }

    #[test]
    fn test_display_sql_inlines_params() {
        let stmt = Statement::new(
            "SELECT * FROM vehicle_master vm WHERE vm.reg_no ILIKE $1 AND vm.id_no = $2",
            vec![SqlParam::Text("O'Neil".to_string()), SqlParam::Int(7)],
        );
        assert_eq!(
            stmt.display_sql(),
            "SELECT * FROM vehicle_master vm WHERE vm.reg_no ILIKE 'O''Neil' AND vm.id_no = 7"
        );
    }
}
