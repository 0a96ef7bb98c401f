//! Error taxonomy for the query pipeline
//!
//! Some kinds are not failures from the user's point of view: a classification
//! miss, an unresolved reference or an unmapped enumeration word all become a
//! clarification reply. The rest stop the turn without advancing the session.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::context::ContextError;
use crate::database::ExecutionError;
use crate::planner::validate::ValidationError;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Downstream collaborator that can stall a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    Encoder,
    Llm,
    Database,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collaborator::Encoder => "embedding encoder",
            Collaborator::Llm => "language model",
            Collaborator::Database => "database",
        };
        write!(f, "{}", name)
    }
}

/// Main error type for a pipeline turn
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no intent matched and no query could be planned")]
    ClassificationMiss { clarification: String },

    #[error("reference could not be resolved: {reason}")]
    ReferenceUnresolved {
        reason: String,
        candidates: Vec<String>,
    },

    #[error("'{word}' is not a recognised value for {column}")]
    ValueDomain {
        column: String,
        word: String,
        accepted: Vec<String>,
    },

    #[error("query rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("database error: {0}")]
    Execution(String),

    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("{collaborator} timed out after {}s", after.as_secs())]
    Timeout {
        collaborator: Collaborator,
        after: Duration,
    },

    #[error("rate limited, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("language model error: {0}")]
    Llm(String),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("context error: {0}")]
    Context(#[from] ContextError),
}

impl From<ExecutionError> for PipelineError {
    fn from(err: ExecutionError) -> Self {
        if err.is_transient() {
            PipelineError::DatabaseUnavailable(err.sanitized_message())
        } else {
            PipelineError::Execution(err.sanitized_message())
        }
    }
}

impl PipelineError {
    /// Kinds that are answered with a clarifying question instead of an error
    pub fn is_clarification(&self) -> bool {
        matches!(
            self,
            PipelineError::ClassificationMiss { .. }
                | PipelineError::ReferenceUnresolved { .. }
                | PipelineError::ValueDomain { .. }
                | PipelineError::Context(_)
        )
    }

    /// Transient database and encoder failures get one retry. The LLM never does.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Timeout { collaborator, .. } => *collaborator != Collaborator::Llm,
            PipelineError::DatabaseUnavailable(_) | PipelineError::Encoder(_) => true,
            _ => false,
        }
    }

    /// Stable tag used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ClassificationMiss { .. } => "classification_miss",
            PipelineError::ReferenceUnresolved { .. } => "reference_unresolved",
            PipelineError::ValueDomain { .. } => "value_domain_mismatch",
            PipelineError::Validation(ValidationError::UnknownColumn { .. }) => {
                "column_not_found"
            }
            PipelineError::Validation(_) => "query_rejected",
            PipelineError::Execution(_) | PipelineError::DatabaseUnavailable(_) => {
                "sql_execution_failure"
            }
            PipelineError::Timeout { .. } => "downstream_timeout",
            PipelineError::RateLimited { .. } => "rate_limited",
            PipelineError::Llm(_) => "llm_failure",
            PipelineError::Encoder(_) => "encoder_failure",
            PipelineError::Context(_) => "reference_unresolved",
        }
    }

    /// Text shown to the user in place of an answer
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::ClassificationMiss { clarification } => clarification.clone(),
            PipelineError::ReferenceUnresolved { reason, candidates } => {
                if candidates.is_empty() {
                    reason.clone()
                } else {
                    format!("{} Did you mean one of: {}?", reason, candidates.join(", "))
                }
            }
            PipelineError::ValueDomain {
                column,
                word,
                accepted,
            } => format!(
                "I can't filter {} by '{}'. Accepted values are: {}.",
                column,
                word,
                accepted.join(", ")
            ),
            PipelineError::Validation(err) => err.user_message(),
            PipelineError::Execution(message) => {
                format!("The database could not run that query: {}", message)
            }
            PipelineError::DatabaseUnavailable(_) => {
                "The database is temporarily unavailable. Please try again.".to_string()
            }
            PipelineError::Timeout {
                collaborator,
                after,
            } => format!(
                "The {} did not respond within {} seconds. Please try again.",
                collaborator,
                after.as_secs()
            ),
            PipelineError::RateLimited { retry_after } => format!(
                "You're sending messages too quickly. Please wait {} seconds.",
                retry_after.as_secs().max(1)
            ),
            PipelineError::Llm(_) => {
                "I couldn't work out a query for that right now. Could you rephrase it?"
                    .to_string()
            }
            PipelineError::Encoder(_) => {
                "Table search is temporarily unavailable. Please try again.".to_string()
            }
            PipelineError::Context(err) => err.to_string(),
        }
    }
}
