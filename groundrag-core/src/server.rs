//! HTTP transport built on axum.
//!
//! A thin wrapper around `PipelineOrchestrator::answer_with_cancellation`:
//! `GET /up` for readiness and `POST {api_prefix}/answer` for questions.
//! Each request gets its own cancellation token, cancelled when the handler
//! future is dropped (the client went away).

use crate::config::ServerConfig;
use crate::error::PipelineError;
use crate::pipeline::{InsufficientReason, PipelineOrchestrator, PipelineOutcome};
use crate::types::Query;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Body of a successful `POST /answer`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerResponse {
    Answered {
        answer: String,
        grounded: bool,
        sources: Vec<String>,
        request_id: Uuid,
    },
    InsufficientEvidence {
        message: String,
        reason: InsufficientReason,
        request_id: Uuid,
    },
}

/// Body of a failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// A pipeline error rendered as an HTTP response.
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            PipelineError::Infrastructure { .. } => (StatusCode::SERVICE_UNAVAILABLE, "infrastructure"),
            PipelineError::InvalidRequest { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request"),
            PipelineError::ContractViolation { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            // Nobody is listening by now; nginx's "client closed request"
            PipelineError::Cancelled => (
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT),
                "cancelled",
            ),
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: kind.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Normalise a route prefix to `/segment` form, or empty.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Build the router with `/up` and `{api_prefix}/answer`.
pub fn router(orchestrator: Arc<PipelineOrchestrator>, api_prefix: &str) -> Router {
    let answer_path = format!("{}/answer", normalize_prefix(api_prefix));
    Router::new()
        .route("/up", get(up_handler))
        .route(&answer_path, post(answer_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Readiness check.
async fn up_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn answer_handler(
    State(orchestrator): State<Arc<PipelineOrchestrator>>,
    Json(query): Json<Query>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();

    let result = orchestrator
        .answer_with_cancellation(query, cancel)
        .await?;
    let request_id = result.stats.request_id;

    let body = match result.outcome {
        PipelineOutcome::Answered(answer) => AnswerResponse::Answered {
            grounded: answer.is_grounded(),
            sources: answer.sources(),
            answer: answer.text,
            request_id,
        },
        PipelineOutcome::InsufficientEvidence { reason } => AnswerResponse::InsufficientEvidence {
            message: crate::prompts::REFUSAL_SENTENCE.to_string(),
            reason,
            request_id,
        },
    };
    Ok(Json(body))
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    orchestrator: Arc<PipelineOrchestrator>,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = router(orchestrator, &config.api_prefix);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        %addr,
        answer_route = %format!("{}/answer", normalize_prefix(&config.api_prefix)),
        "HTTP server listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{Brain, MockLanguageModel};
    use crate::config::{RagConfig, RetryConfig};
    use crate::retriever::StaticRetriever;
    use crate::types::{Passage, PassageMetadata};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(model: MockLanguageModel) -> Router {
        let brain = Brain::new(
            Arc::new(model),
            Duration::from_secs(5),
            RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
        );
        let retriever = StaticRetriever::new(vec![Passage::new(
            "ghg.md#0",
            "Scope 3 covers value chain emissions.",
            PassageMetadata {
                document_id: "ghg.md".into(),
                position: 0,
            },
        )]);
        let orchestrator =
            PipelineOrchestrator::new(Arc::new(brain), Arc::new(retriever), &RagConfig::default());
        router(Arc::new(orchestrator), "/api/v1/")
    }

    fn answer_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/answer")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/api/v1/"), "/api/v1");
        assert_eq!(normalize_prefix("api"), "/api");
        assert_eq!(normalize_prefix("/"), "");
    }

    #[tokio::test]
    async fn test_up() {
        let resp = app(MockLanguageModel::new())
            .oneshot(Request::get("/up").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_answered() {
        let model = MockLanguageModel::with_handler(|req| {
            let system = req.system.as_deref().unwrap_or_default();
            Ok(if system.contains("relevant to a user question") {
                MockLanguageModel::json_response(json!({"relevant": true, "rationale": "on topic"}))
            } else if system.contains("grounded in a set of facts") {
                MockLanguageModel::json_response(json!({"grounded": true}))
            } else {
                MockLanguageModel::text_response("Scope 3 covers value chain emissions.")
            })
        });
        let resp = app(model)
            .oneshot(answer_request(json!({"query": "What is Scope 3?"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_json(resp).await;
        assert_eq!(body["status"], "answered");
        assert_eq!(body["grounded"], true);
        assert_eq!(body["sources"], json!(["ghg.md#0"]));
    }

    #[tokio::test]
    async fn test_insufficient_evidence() {
        let model = MockLanguageModel::with_handler(|req| {
            let system = req.system.as_deref().unwrap_or_default();
            Ok(if system.contains("relevant to a user question") {
                MockLanguageModel::json_response(json!({"relevant": false, "rationale": "off topic"}))
            } else {
                MockLanguageModel::json_response(json!({"keywords": []}))
            })
        });
        let resp = app(model)
            .oneshot(answer_request(json!({"query": "Who won the cup?", "history": []})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_json(resp).await;
        assert_eq!(body["status"], "insufficient_evidence");
        assert_eq!(body["reason"], "no_keywords");
        assert_eq!(body["message"], crate::prompts::REFUSAL_SENTENCE);
    }

    #[tokio::test]
    async fn test_infrastructure_error_is_503() {
        let model = MockLanguageModel::with_handler(|_| {
            Err(crate::error::LlmError::AuthFailed {
                provider: "openai".into(),
            })
        });
        let resp = app(model)
            .oneshot(answer_request(json!({"query": "What is Scope 3?"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_json(resp).await["kind"], "infrastructure");
    }

    #[tokio::test]
    async fn test_empty_query_is_422() {
        let resp = app(MockLanguageModel::new())
            .oneshot(answer_request(json!({"query": "  "})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(read_json(resp).await["kind"], "invalid_request");
    }
}
