//! Query pipeline: one chat turn end to end
//!
//! The session lock is held for the whole turn, so turns of one session run
//! in arrival order. All work is done against a shared borrow of the
//! session; it is only mutated once the turn has fully succeeded.

use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agentic::LlmClient;
use crate::config::PipelineConfig;
use crate::context::{ConversationJournal, EntityKind, LastResult, Session, SessionStore, TopicEntities, Turn};
use crate::database::{execute_with_retry, QueryRows, Row, SqlExecutor};
use crate::error::{PipelineError, Result};
use crate::followup::{FollowUpOperator, FollowUpOutcome, ReferentialOperation};
use crate::formatter::{ResponseTemplate, ResultFormatter};
use crate::intent::{ClassifyContext, IntentClassifier};
use crate::masking::MaskingLayer;
use crate::planner::{self, Plan, PlanOrigin, Planned, QueryPlanner};
use crate::ranker::TableRanker;
use crate::resolver::{self, OrdinalTarget, Resolution};
use crate::schema::SchemaIndex;

/// Turns of prior conversation offered to the LLM planner
const PROMPT_HISTORY: usize = 3;

/// A prior message supplied by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    /// Seeds a fresh session; ignored once the session has turns
    #[serde(default)]
    pub history: Option<Vec<HistoryMessage>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Whether any resolution or rewrite step shaped the answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_applied: Option<bool>,
    /// The steps themselves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Vec<String>>,
}

impl ChatResponse {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Default::default()
        }
    }
}

/// Everything a successful turn changes, applied in one step
#[derive(Debug, Default)]
struct Outcome {
    text: String,
    follow_up: Option<String>,
    data: Option<QueryRows>,
    sql: Option<String>,
    record: Option<LastResult>,
    entities: TopicEntities,
    intent_tag: Option<String>,
    reasoning: Vec<String>,
    /// (utterance, sql) worth remembering as a prompt example
    pattern: Option<(String, String)>,
}

impl Outcome {
    fn text(text: String, follow_up: Option<String>, reasoning: Vec<String>) -> Self {
        Self {
            text,
            follow_up,
            reasoning,
            ..Default::default()
        }
    }
}

enum FollowUpStep {
    Done(Outcome),
    /// Hand this utterance to the main path
    Requery(String),
}

pub struct QueryPipeline {
    config: PipelineConfig,
    sessions: SessionStore,
    classifier: IntentClassifier,
    planner: QueryPlanner,
    masking: MaskingLayer,
    formatter: ResultFormatter,
    followup: FollowUpOperator,
    executor: Arc<dyn SqlExecutor>,
    journal: Option<Arc<dyn ConversationJournal>>,
}

impl QueryPipeline {
    pub fn new(
        config: PipelineConfig,
        index: Arc<SchemaIndex>,
        llm: Option<Arc<dyn LlmClient>>,
        executor: Arc<dyn SqlExecutor>,
    ) -> Self {
        let planner = QueryPlanner::new(
            index,
            TableRanker::new(config.table_shortlist_k),
            llm.clone(),
            config.llm_timeout(),
        );
        Self {
            sessions: SessionStore::new(config.history_window, config.display_row_cap)
                .with_limits(config.session_idle_ttl(), config.max_sessions),
            classifier: IntentClassifier::new(),
            planner,
            masking: MaskingLayer::from_config(&config),
            formatter: ResultFormatter::new(config.table_row_limit, config.display_row_cap),
            followup: FollowUpOperator::new(llm, config.llm_timeout()),
            executor,
            journal: None,
            config,
        }
    }

    /// Persist completed turns and topic entities
    pub fn with_journal(mut self, journal: Arc<dyn ConversationJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn index(&self) -> &Arc<SchemaIndex> {
        self.planner.index()
    }

    /// Run one turn. Clarifications are replies, not errors; any other error
    /// leaves the session as it was.
    #[instrument(skip(self, request), fields(session = %request.session_id))]
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse> {
        let handle = self.sessions.session(&request.session_id).await;
        let mut session = handle.lock().await;

        if let Some(history) = &request.history {
            seed_history(&mut session, history);
        }

        let message = request.message.trim();
        let today = Local::now().date_naive();

        match self.run_turn(&session, message, today).await {
            Ok(outcome) => {
                let response = self.commit(&mut session, message, outcome).await;
                Ok(response)
            }
            Err(err) if err.is_clarification() => {
                info!(kind = err.kind(), "answering with a clarification");
                let text = self.masking.scrub_text(&err.user_message());
                let turn = Turn::text(message, text.clone());
                session.append_turn(turn);
                self.journal_turn(&session, None).await;
                Ok(ChatResponse::text(text))
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "turn failed");
                Err(err)
            }
        }
    }

    async fn run_turn(&self, session: &Session, message: &str, today: NaiveDate) -> Result<Outcome> {
        if message.is_empty() {
            return Err(PipelineError::ClassificationMiss {
                clarification: planner::CLARIFICATION.to_string(),
            });
        }

        let mut reasoning = Vec::new();

        if resolver::is_reformat_request(message) {
            if let Some(last) = session.last_result() {
                let rendered = self.formatter.reformat(&last.columns, &last.rows);
                reasoning.push("re-rendered the previous result".to_string());
                return Ok(Outcome {
                    text: self.masking.scrub_text(&rendered.text),
                    data: Some(last.as_query_rows()),
                    reasoning,
                    ..Default::default()
                });
            }
        }

        let mut utterance = message.to_string();
        let mut target: Option<OrdinalTarget> = None;

        match resolver::resolve(message, session, today) {
            Resolution::Unchanged => {}
            Resolution::Rewritten {
                utterance: rewritten,
                target: ordinal,
            } => {
                reasoning.push(format!("resolved reference: \"{}\"", rewritten));
                utterance = rewritten;
                target = ordinal;
            }
            Resolution::Referential(reference) => {
                match self.follow_up(message, reference, session, &mut reasoning).await? {
                    FollowUpStep::Done(outcome) => return Ok(outcome),
                    FollowUpStep::Requery(rewritten) => {
                        reasoning.push(format!("looked up \"{}\"", rewritten));
                        utterance = rewritten;
                    }
                }
            }
            Resolution::Clarify(err) => return Err(err),
        }

        let ctx = ClassifyContext::from_session(session, today);
        let (plan, entities) = match self.classifier.classify(&utterance, &ctx) {
            Some(intent) => {
                info!(intent = intent.tag(), "intent matched");
                reasoning.push(format!("template: {}", intent.tag()));
                (planner::build(&intent)?, intent.entities())
            }
            None => {
                let history = session.recent(PROMPT_HISTORY);
                match self.planner.plan_with_llm(&utterance, &history).await? {
                    Planned::Query(plan) => {
                        reasoning.push(format!(
                            "planned by the language model over {}",
                            plan.tables.iter().cloned().collect::<Vec<_>>().join(", ")
                        ));
                        (plan, TopicEntities::default())
                    }
                    Planned::Reply { text, follow_up } => {
                        return Ok(Outcome::text(
                            self.masking.scrub_text(&text),
                            follow_up,
                            reasoning,
                        ))
                    }
                }
            }
        };

        self.run_plan(&utterance, plan, entities, target.as_ref(), reasoning)
            .await
    }

    async fn run_plan(
        &self,
        utterance: &str,
        plan: Plan,
        entities: TopicEntities,
        target: Option<&OrdinalTarget>,
        mut reasoning: Vec<String>,
    ) -> Result<Outcome> {
        let statement = self.masking.rewrite(&plan.statement)?;
        if statement.sql != plan.statement.sql {
            reasoning.push("masking rewrite applied".to_string());
        }

        let data = execute_with_retry(&self.executor, &statement, self.config.sql_timeout()).await?;
        debug!(rows = data.len(), "statement executed");

        let masked = self.masking.mask_rows(data);
        let subject = target.map(OrdinalTarget::subject);
        let rendered = self.formatter.render(
            &masked.data,
            &plan.response,
            plan.empty_hint.as_ref(),
            subject.as_deref(),
            &masked.notices,
        );

        let sql = statement.display_sql();
        let record = (!masked.data.is_empty()).then(|| {
            LastResult::new(
                utterance,
                sql.clone(),
                masked.data.clone(),
                self.config.display_row_cap,
            )
        });
        let pattern = (plan.origin == PlanOrigin::Llm && !masked.data.is_empty())
            .then(|| (utterance.to_string(), statement.sql.clone()));

        Ok(Outcome {
            text: self.masking.scrub_text(&rendered.text),
            follow_up: plan.follow_up.clone().or(rendered.follow_up),
            data: Some(masked.data),
            sql: Some(sql),
            record,
            entities,
            intent_tag: plan.intent_tag().map(str::to_string),
            reasoning,
            pattern,
        })
    }

    async fn follow_up(
        &self,
        message: &str,
        reference: ReferentialOperation,
        session: &Session,
        reasoning: &mut Vec<String>,
    ) -> Result<FollowUpStep> {
        let Some(last) = session.last_result() else {
            return Err(PipelineError::ReferenceUnresolved {
                reason: "There are no previous results to work with yet.".to_string(),
                candidates: Vec::new(),
            });
        };

        let op = self.followup.plan(&reference, last).await?;
        debug!(?op, "follow-up over the previous result");
        reasoning.push("answered from the previous result".to_string());

        let outcome = match self.followup.apply(&op, last) {
            FollowUpOutcome::Requery(utterance) => return Ok(FollowUpStep::Requery(utterance)),
            FollowUpOutcome::Answer(text) => {
                Outcome::text(self.masking.scrub_text(&text), None, std::mem::take(reasoning))
            }
            FollowUpOutcome::Rows {
                data,
                lead,
                empty,
                replaces_last,
            } => {
                let text = if data.is_empty() {
                    empty
                } else {
                    self.formatter
                        .render(&data, &ResponseTemplate::Lead(lead), None, None, &[])
                        .text
                };
                let record = (replaces_last && !data.is_empty()).then(|| {
                    LastResult::new(message, last.sql.clone(), data.clone(), self.config.display_row_cap)
                });
                Outcome {
                    text: self.masking.scrub_text(&text),
                    data: Some(data),
                    record,
                    reasoning: std::mem::take(reasoning),
                    ..Default::default()
                }
            }
        };
        Ok(FollowUpStep::Done(outcome))
    }

    /// Apply a successful turn to the session
    async fn commit(&self, session: &mut Session, message: &str, outcome: Outcome) -> ChatResponse {
        let Outcome {
            text,
            follow_up,
            data,
            sql,
            record,
            entities,
            intent_tag,
            reasoning,
            pattern,
        } = outcome;

        let result_count = data.as_ref().map(QueryRows::len);
        if let Some(record) = record {
            session.record_result(record);
        }
        session.note_entities(entities.clone());

        let shown = data.map(|d| {
            let rows: Vec<Row> = d.rows.into_iter().take(self.config.display_row_cap).collect();
            (d.columns, rows)
        });
        let (columns, rows) = match shown {
            Some((columns, rows)) => (Some(columns), Some(rows)),
            None => (None, None),
        };

        session.append_turn(Turn {
            user_text: message.to_string(),
            assistant_text: text.clone(),
            sql: sql.clone(),
            columns: columns.clone(),
            rows: rows.clone(),
            extracted_entities: entities,
            intent_tag,
            timestamp: Utc::now(),
            turn_index: 0,
        });
        self.journal_turn(session, result_count).await;

        if let Some((utterance, sql)) = pattern {
            self.planner.index().add_query_pattern(&utterance, &sql).await;
        }

        ChatResponse {
            response: text,
            follow_up,
            columns,
            rows,
            sql,
            reasoning_applied: Some(!reasoning.is_empty()),
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
        }
    }

    /// Best-effort persistence of the newest turn
    async fn journal_turn(&self, session: &Session, result_count: Option<usize>) {
        let Some(journal) = &self.journal else {
            return;
        };
        let Some(turn) = session.recent(1).into_iter().next() else {
            return;
        };
        if let Err(e) = journal.record_turn(&session.id, turn, result_count).await {
            warn!("Could not record turn: {}", e);
        }
        let topic = session.entities().get(EntityKind::ReportKind);
        if let Err(e) = journal.save_context(&session.id, session.entities(), topic).await {
            warn!("Could not save conversation context: {}", e);
        }
    }
}

/// Replay client-held history into a fresh session as text turns
fn seed_history(session: &mut Session, history: &[HistoryMessage]) {
    if session.turn_count() > 0 {
        return;
    }
    let mut pending_user: Option<&str> = None;
    for message in history {
        match message.role.as_str() {
            "user" => pending_user = Some(message.content.as_str()),
            "assistant" => {
                if let Some(user) = pending_user.take() {
                    session.append_turn(Turn::text(user, message.content.as_str()));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ExecutionError, SqlParam};
    use crate::schema::{InMemoryEmbeddingStore, TableCatalogue};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct VehiclesExecutor;

    #[async_trait]
    impl SqlExecutor for VehiclesExecutor {
        async fn execute(&self, sql: &str, _params: &[SqlParam]) -> std::result::Result<QueryRows, ExecutionError> {
            if sql.contains("crm_complaint_dtls") {
                return Err(ExecutionError::Rejected("relation does not exist".into()));
            }
            Ok(QueryRows::new(
                vec!["zone_name".into()],
                vec![vec![json!("North")], vec![json!("South")]],
            ))
        }
    }

    async fn pipeline() -> QueryPipeline {
        let index = SchemaIndex::build(
            TableCatalogue::bundled().unwrap(),
            None,
            Arc::new(InMemoryEmbeddingStore::new()),
            Duration::from_secs(1),
        )
        .await;
        QueryPipeline::new(
            PipelineConfig::default(),
            Arc::new(index),
            None,
            Arc::new(VehiclesExecutor),
        )
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            session_id: "unit".into(),
            message: message.into(),
            history: None,
        }
    }

    #[tokio::test]
    async fn test_reformat_keeps_last_result() {
        let pipeline = pipeline().await;
        let first = pipeline.handle(request("list zones")).await.unwrap();
        assert_eq!(first.rows.as_ref().map(Vec::len), Some(2));

        let again = pipeline.handle(request("show that as a table")).await.unwrap();
        assert!(again.response.starts_with("Here are the previous results:"));
        assert!(again.sql.is_none());

        let body = serde_json::to_value(&again).unwrap();
        assert_eq!(body["reasoning_applied"], serde_json::json!(true));
        assert_eq!(body["reasoning"][0], "re-rendered the previous result");

        let handle = pipeline.sessions().session("unit").await;
        let session = handle.lock().await;
        assert_eq!(session.item_by_ordinal(2).unwrap().text("zone_name").as_deref(), Some("South"));
        assert_eq!(session.turn_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_turn_does_not_advance_session() {
        let pipeline = pipeline().await;
        let err = pipeline
            .handle(request("how many open complaints"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "sql_execution_failure");

        let handle = pipeline.sessions().session("unit").await;
        assert_eq!(handle.lock().await.turn_count(), 0);
    }

    #[tokio::test]
    async fn test_unplannable_question_is_a_clarification_turn() {
        let pipeline = pipeline().await;
        let response = pipeline.handle(request("list all trips")).await.unwrap();
        assert_eq!(response.response, planner::CLARIFICATION);

        let handle = pipeline.sessions().session("unit").await;
        assert_eq!(handle.lock().await.turn_count(), 1);
    }

    #[test]
    fn test_history_seeds_fresh_session_only() {
        let mut session = Session::new("s", 20, 50);
        let history = vec![
            HistoryMessage {
                role: "user".into(),
                content: "list zones".into(),
            },
            HistoryMessage {
                role: "assistant".into(),
                content: "Here are all the zones".into(),
            },
        ];
        seed_history(&mut session, &history);
        assert_eq!(session.turn_count(), 1);
        seed_history(&mut session, &history);
        assert_eq!(session.turn_count(), 1);
    }
}
