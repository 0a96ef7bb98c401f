//! HTTP ingress
//!
//! `POST /api/chat` runs one turn; `GET /api/health` reports session and
//! embedding statistics. CORS and request tracing layers are added by the
//! server binary.

pub mod chat_routes;
pub mod rate_limit;

pub use chat_routes::create_chat_router;
pub use rate_limit::SessionRateLimiter;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::error::{Collaborator, PipelineError};

/// JSON error body with a stable `error_kind`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// A pipeline error on its way out of a handler
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::Timeout {
                collaborator: Collaborator::Database,
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Timeout { .. }
            | PipelineError::Llm(_)
            | PipelineError::Encoder(_)
            | PipelineError::DatabaseUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Execution(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self.0 {
            PipelineError::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };
        let body = ErrorBody {
            error_kind: self.0.kind(),
            message: self.0.user_message(),
            retry_after_secs: retry_after,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
