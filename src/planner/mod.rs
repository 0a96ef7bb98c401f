//! Query Planner
//!
//! Two paths produce a [`Plan`]: the template builders for recognised
//! intents, and the LLM for everything else. LLM output is treated as
//! untrusted. It is parsed tolerantly and validated against the shortlist
//! and the catalogue before anything runs.

pub mod dates;
pub mod hierarchy;
pub mod llm_response;
pub mod prompt;
pub mod templates;
pub mod validate;
pub mod values;

pub use templates::build;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::agentic::{chat_json_with_timeout, LlmClient};
use crate::context::Turn;
use crate::database::Statement;
use crate::error::{PipelineError, Result};
use crate::formatter::{EmptyHint, ResponseTemplate};
use crate::ranker::{RankedTable, TableRanker};
use crate::schema::{SchemaIndex, PATTERN_THRESHOLD};

use hierarchy::missing_levels;
use llm_response::parse_reply;
use validate::validate_sql;

/// Reply used when neither a template nor the LLM can plan the question
pub const CLARIFICATION: &str = "I'm not sure what you're asking. You can ask things like \
\"which plant does vehicle ABC-123 belong to\", \"how many open complaints are there\" \
or \"distance report for yesterday\".";

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOrigin {
    Template(&'static str),
    Llm,
}

/// A runnable query and how to describe its result
#[derive(Debug, Clone)]
pub struct Plan {
    pub statement: Statement,
    /// Bare names of the tables read
    pub tables: BTreeSet<String>,
    pub response: ResponseTemplate,
    pub empty_hint: Option<EmptyHint>,
    pub origin: PlanOrigin,
    pub follow_up: Option<String>,
}

impl Plan {
    pub fn intent_tag(&self) -> Option<&'static str> {
        match self.origin {
            PlanOrigin::Template(tag) => Some(tag),
            PlanOrigin::Llm => None,
        }
    }
}

/// Outcome of the LLM path
#[derive(Debug, Clone)]
pub enum Planned {
    Query(Plan),
    /// The model answered without data
    Reply {
        text: String,
        follow_up: Option<String>,
    },
}

pub struct QueryPlanner {
    index: Arc<SchemaIndex>,
    ranker: TableRanker,
    llm: Option<Arc<dyn LlmClient>>,
    llm_timeout: Duration,
}

impl QueryPlanner {
    pub fn new(
        index: Arc<SchemaIndex>,
        ranker: TableRanker,
        llm: Option<Arc<dyn LlmClient>>,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            index,
            ranker,
            llm,
            llm_timeout,
        }
    }

    pub fn index(&self) -> &Arc<SchemaIndex> {
        &self.index
    }

    /// Shortlist for an utterance, closed over the hierarchy levels between
    /// any two it names
    pub async fn shortlist(&self, utterance: &str) -> Vec<RankedTable> {
        let k = self.ranker.shortlist_k();
        let matches = self.index.find_relevant_tables(utterance, k * 2).await;
        let catalogue = self.index.catalogue();
        let mut ranked = self.ranker.rank(utterance, catalogue, &matches);

        let missing = missing_levels(ranked.iter().map(|r| r.bare_name()));
        for level in missing {
            if let Some(entry) = catalogue.get(level.table()) {
                debug!(table = %entry.name, "adding intermediate hierarchy level to shortlist");
                ranked.push(RankedTable {
                    qualified_name: entry.qualified_name.clone(),
                    score: 0.0,
                    priority: false,
                    fuzzy: 0.0,
                    embedding: 0.0,
                    description: entry.description.clone(),
                });
            }
        }
        ranked
    }

    /// Plan a question no template recognised
    #[instrument(skip(self, history), fields(shortlist = tracing::field::Empty))]
    pub async fn plan_with_llm(&self, utterance: &str, history: &[&Turn]) -> Result<Planned> {
        let Some(llm) = &self.llm else {
            info!("No LLM configured, cannot plan unrecognised question");
            return Err(miss());
        };

        let shortlist = self.shortlist(utterance).await;
        if shortlist.is_empty() {
            return Err(miss());
        }
        let allowed: BTreeSet<String> = shortlist
            .iter()
            .map(|r| r.bare_name().to_lowercase())
            .collect();
        tracing::Span::current().record("shortlist", tracing::field::debug(&allowed));

        let example = self
            .index
            .find_similar_query(utterance, PATTERN_THRESHOLD)
            .await;
        let catalogue = self.index.catalogue();
        let user = prompt::user_prompt(utterance, &shortlist, catalogue, history, example.as_ref());

        let raw = chat_json_with_timeout(
            llm.as_ref(),
            prompt::SYSTEM_PROMPT,
            &user,
            self.llm_timeout,
        )
        .await?;

        let Some(reply) = parse_reply(&raw) else {
            warn!("LLM reply was not a usable JSON object");
            return Err(miss());
        };

        let Some(sql) = reply.sql() else {
            return Ok(Planned::Reply {
                text: reply.response.clone(),
                follow_up: reply.follow_up.clone(),
            });
        };

        let tables = validate_sql(sql, catalogue, &allowed).map_err(|e| {
            warn!(error = %e, "LLM SQL rejected");
            PipelineError::from(e)
        })?;

        Ok(Planned::Query(Plan {
            statement: Statement::raw(sql),
            tables,
            response: ResponseTemplate::Llm(if reply.response.trim().is_empty() {
                "Here's what I found:".to_string()
            } else {
                reply.response.clone()
            }),
            empty_hint: None,
            origin: PlanOrigin::Llm,
            follow_up: reply.follow_up.clone(),
        }))
    }
}

fn miss() -> PipelineError {
    PipelineError::ClassificationMiss {
        clarification: CLARIFICATION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{InMemoryEmbeddingStore, TableCatalogue};
    use async_trait::async_trait;

    struct ScriptedLlm(String);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, _: &str, _: &str) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
        async fn chat_json(&self, _: &str, _: &str) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn provider_name(&self) -> &str {
            "test"
        }
    }

    async fn planner(reply: &str) -> QueryPlanner {
        let index = SchemaIndex::build(
            TableCatalogue::bundled().unwrap(),
            None,
            Arc::new(InMemoryEmbeddingStore::new()),
            Duration::from_secs(1),
        )
        .await;
        QueryPlanner::new(
            Arc::new(index),
            TableRanker::new(8),
            Some(Arc::new(ScriptedLlm(reply.to_string()))),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_llm_sql_is_validated_and_planned() {
        let planner = planner(
            r#"{"sql": "SELECT mt.reg_no, mt.trip_date FROM mega_trips mt", "response": "All trips:"}"#,
        )
        .await;
        let planned = planner.plan_with_llm("list all trips", &[]).await.unwrap();
        match planned {
            Planned::Query(plan) => {
                assert_eq!(plan.origin, PlanOrigin::Llm);
                assert!(plan.tables.contains("mega_trips"));
                assert_eq!(plan.response, ResponseTemplate::Llm("All trips:".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_llm_sql_outside_shortlist_is_rejected() {
        let planner = planner(r#"{"sql": "SELECT * FROM pg_user", "response": "x"}"#).await;
        let err = planner.plan_with_llm("list all trips", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_clarification() {
        let planner = planner("I think you want trips").await;
        let err = planner.plan_with_llm("list all trips", &[]).await.unwrap_err();
        assert!(err.is_clarification());
    }

    #[tokio::test]
    async fn test_text_reply() {
        let planner = planner(r#"{"response": "Trips are journeys between plants and sites."}"#).await;
        let planned = planner.plan_with_llm("what is a trip", &[]).await.unwrap();
        assert!(matches!(planned, Planned::Reply { ref text, .. } if text.starts_with("Trips are")));
    }

    #[tokio::test]
    async fn test_shortlist_closes_hierarchy() {
        let planner = planner("{}").await;
        let shortlist = planner.shortlist("vehicles in each zone").await;
        let names: Vec<&str> = shortlist.iter().map(|r| r.bare_name()).collect();
        assert!(names.contains(&"vehicle_master"));
        assert!(names.contains(&"zone_master"));
        assert!(names.contains(&"hosp_master"));
        assert!(names.contains(&"district_master"));
    }
}
