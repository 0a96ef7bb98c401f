//! Chat and health routes

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tracing::error;

use crate::error::PipelineError;
use crate::pipeline::{ChatRequest, ChatResponse, QueryPipeline};
use crate::schema::EmbeddingStats;

use super::{ApiError, SessionRateLimiter};

#[derive(Clone)]
pub struct ChatState {
    pub pipeline: Arc<QueryPipeline>,
    pub limiter: Arc<SessionRateLimiter>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    /// Sessions with requests inside the current rate-limit window
    pub rate_limited_sessions: usize,
    pub embeddings: EmbeddingStats,
}

/// POST /api/chat
///
/// The turn runs in its own task: if the client goes away the turn still
/// completes and the session is still updated.
async fn chat(
    State(state): State<ChatState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if let Err(retry_after) = state.limiter.check(&request.session_id).await {
        return Err(PipelineError::RateLimited { retry_after }.into());
    }

    let pipeline = state.pipeline.clone();
    let turn = tokio::spawn(async move { pipeline.handle(request).await });
    match turn.await {
        Ok(outcome) => Ok(Json(outcome?)),
        Err(join_error) => {
            error!("Chat turn task failed: {}", join_error);
            Err(PipelineError::Execution("the request could not be completed".to_string()).into())
        }
    }
}

/// GET /api/health
async fn health(State(state): State<ChatState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.pipeline.sessions().len().await,
        rate_limited_sessions: state.limiter.tracked().await,
        embeddings: state.pipeline.index().stats().await,
    })
}

/// Create the chat router
pub fn create_chat_router(pipeline: Arc<QueryPipeline>) -> Router {
    let limiter = Arc::new(SessionRateLimiter::per_minute(
        pipeline.config().rate_limit_rpm,
    ));
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/health", get(health))
        .with_state(ChatState { pipeline, limiter })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::database::{ExecutionError, QueryRows, SqlExecutor, SqlParam};
    use crate::schema::{InMemoryEmbeddingStore, SchemaIndex, TableCatalogue};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    struct ZonesExecutor;

    #[async_trait]
    impl SqlExecutor for ZonesExecutor {
        async fn execute(&self, _sql: &str, _params: &[SqlParam]) -> Result<QueryRows, ExecutionError> {
            Ok(QueryRows::new(vec!["zone_name".into()], vec![vec![json!("North")]]))
        }
    }

    async fn router(rpm: u32) -> Router {
        let index = SchemaIndex::build(
            TableCatalogue::bundled().unwrap(),
            None,
            Arc::new(InMemoryEmbeddingStore::new()),
            Duration::from_secs(1),
        )
        .await;
        let config = PipelineConfig {
            rate_limit_rpm: rpm,
            ..PipelineConfig::default()
        };
        let pipeline = QueryPipeline::new(config, Arc::new(index), None, Arc::new(ZonesExecutor));
        create_chat_router(Arc::new(pipeline))
    }

    fn chat_request(message: &str) -> Request<Body> {
        Request::post("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"session_id": "web-1", "message": message}).to_string(),
            ))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_returns_rows() {
        let app = router(8).await;
        let response = app.oneshot(chat_request("list zones")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["columns"], json!(["zone_name"]));
        assert!(body["sql"].as_str().unwrap().contains("zone_master"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_429_with_kind() {
        let app = router(1).await;
        let first = app.clone().oneshot(chat_request("list zones")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(chat_request("list zones")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
        let body = body_json(second).await;
        assert_eq!(body["error_kind"], "rate_limited");
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let app = router(8).await;
        app.clone().oneshot(chat_request("list zones")).await.unwrap();
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 1);
        assert_eq!(body["rate_limited_sessions"], 1);
        assert!(body["embeddings"]["tables"].as_u64().unwrap() > 0);
    }
}
