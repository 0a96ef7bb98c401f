//! Conversational query pipeline for a fleet-management database
//!
//! Turns an English question into a read-only PostgreSQL query, executes it,
//! masks sensitive values and renders the rows as a chat reply. Follow-up
//! questions ("the 3rd vehicle", "which ones are under 10000?") resolve
//! against per-session memory.
//!
//! # Architecture
//!
//! ```text
//! Utterance
//!     │
//!     ▼
//! ┌──────────────────────────────┐      ┌───────────────────────────┐
//! │ Reference Resolver           │─────►│ Follow-up Operator        │
//! │ ordinal / pronoun / topic    │ refs │ count, filter, project... │
//! └──────────────────────────────┘      └───────────────────────────┘
//!     │ rewritten utterance
//!     ▼
//! ┌──────────────────────────────┐ miss ┌───────────────────────────┐
//! │ Intent Classifier            │─────►│ Schema Index + Ranker     │
//! │ ordered regex templates      │      │ priority · fuzzy · vector │
//! └──────────────────────────────┘      └───────────────────────────┘
//!     │ Intent                              │ shortlist
//!     ▼                                     ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Query Planner: template builders │ LLM prompt + JSON + validator │
//! └──────────────────────────────────────────────────────────────────┘
//!     │ SQL + params
//!     ▼
//! ┌──────────────────────────────┐
//! │ Masking: projection, status, │──► execute ──► mask rows ──► format
//! │ value-domain verification    │
//! └──────────────────────────────┘
//! ```
//!
//! The `database` feature adds the Postgres executor, schema introspection
//! and persistence; `server` adds the HTTP endpoint and the `fleet_server`
//! binary.

pub mod agentic;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod followup;
pub mod formatter;
pub mod intent;
pub mod masking;
pub mod pipeline;
pub mod planner;
pub mod ranker;
pub mod resolver;
pub mod schema;

#[cfg(feature = "server")]
pub mod api;

pub use config::PipelineConfig;
pub use context::{LastResult, Session, SessionStore, Turn};
pub use database::{QueryRows, SqlExecutor, SqlParam};
pub use error::{PipelineError, Result};
pub use intent::{Intent, IntentClassifier};
pub use pipeline::{ChatRequest, ChatResponse, QueryPipeline};
pub use schema::{SchemaIndex, TableCatalogue};
