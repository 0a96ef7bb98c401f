//! Pipeline configuration
//!
//! Every option has a default and an environment override. `.env` files are
//! honoured through `dotenvy` when [`PipelineConfig::from_env`] is used.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default literals stored on region/zone rows of inactive vehicles
pub const DEFAULT_SENSITIVE_LITERALS: &[&str] = &["EONINFOTECH", "EON INFOTECH", "EON INFO TECH"];

/// Default plant-name markers for vehicles whose device was removed
pub const DEFAULT_REMOVED_MARKERS: &[&str] = &["EON OFFICE", "EON_OFFICE"];

/// Runtime options for the query pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum rows retained for ordinal indexing and rendering
    pub display_row_cap: usize,
    /// Rows rendered in the head of a large result
    pub table_row_limit: usize,
    /// Turns retained per session
    pub history_window: usize,
    /// Sessions idle this long are dropped when a new session starts
    pub session_idle_ttl_s: u64,
    pub max_sessions: usize,
    /// Table candidates fed to the LLM path
    pub table_shortlist_k: usize,
    /// Per-session ingress limit (requests per minute)
    pub rate_limit_rpm: u32,
    pub sql_timeout_s: u64,
    pub llm_timeout_s: u64,
    pub encoder_timeout_s: u64,
    /// Toggles the masking layer
    pub mask_sensitive_values: bool,
    /// Replace removed-device vehicle rows with a notice
    pub hide_removed_vehicles: bool,
    /// Stored values rendered as "Inactive Region"
    pub sensitive_literals: Vec<String>,
    /// Plant-name fragments marking a removed device
    pub removed_markers: Vec<String>,
    pub embedding_model_name: String,
    pub embedding_dimension: usize,
    /// Width of the request worker pool
    pub worker_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            display_row_cap: env_or("FLEET_DISPLAY_ROW_CAP", 50),
            table_row_limit: env_or("FLEET_TABLE_ROW_LIMIT", 20),
            history_window: env_or("FLEET_HISTORY_WINDOW", 20),
            session_idle_ttl_s: env_or("FLEET_SESSION_IDLE_TTL_S", 1800),
            max_sessions: env_or("FLEET_MAX_SESSIONS", 10_000),
            table_shortlist_k: env_or("FLEET_TABLE_SHORTLIST_K", 8),
            rate_limit_rpm: env_or("FLEET_RATE_LIMIT_RPM", 8),
            sql_timeout_s: env_or("FLEET_SQL_TIMEOUT_S", 20),
            llm_timeout_s: env_or("FLEET_LLM_TIMEOUT_S", 30),
            encoder_timeout_s: env_or("FLEET_ENCODER_TIMEOUT_S", 5),
            mask_sensitive_values: env_or("FLEET_MASK_SENSITIVE_VALUES", true),
            hide_removed_vehicles: env_or("FLEET_HIDE_REMOVED_VEHICLES", true),
            sensitive_literals: env_list("FLEET_SENSITIVE_LITERALS", DEFAULT_SENSITIVE_LITERALS),
            removed_markers: env_list("FLEET_REMOVED_MARKERS", DEFAULT_REMOVED_MARKERS),
            embedding_model_name: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimension: env_or("EMBEDDING_DIMENSION", 384),
            worker_threads: env_or("FLEET_WORKER_THREADS", 8),
        }
    }
}

impl PipelineConfig {
    /// Load `.env` (if present) and build from the environment
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::default()
    }

    pub fn sql_timeout(&self) -> Duration {
        Duration::from_secs(self.sql_timeout_s)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_s)
    }

    pub fn encoder_timeout(&self) -> Duration {
        Duration::from_secs(self.encoder_timeout_s)
    }

    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session_idle_ttl_s)
    }
}

pub(crate) fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.display_row_cap, 50);
        assert_eq!(config.history_window, 20);
        assert_eq!(config.table_shortlist_k, 8);
        assert_eq!(config.rate_limit_rpm, 8);
        assert_eq!(config.sql_timeout(), Duration::from_secs(20));
        assert_eq!(config.llm_timeout(), Duration::from_secs(30));
        assert_eq!(config.encoder_timeout(), Duration::from_secs(5));
        assert_eq!(config.session_idle_ttl(), Duration::from_secs(1800));
        assert_eq!(config.max_sessions, 10_000);
        assert!(config.mask_sensitive_values);
        assert!(config
            .sensitive_literals
            .iter()
            .any(|literal| literal == "EONINFOTECH"));
    }

    #[test]
    fn test_env_list_parsing() {
        std::env::set_var("FLEET_TEST_LIST_PARSE", " A , B,,C ");
        assert_eq!(env_list("FLEET_TEST_LIST_PARSE", &["X"]), vec!["A", "B", "C"]);
        std::env::remove_var("FLEET_TEST_LIST_PARSE");
        assert_eq!(env_list("FLEET_TEST_LIST_PARSE", &["X"]), vec!["X"]);
    }
}
