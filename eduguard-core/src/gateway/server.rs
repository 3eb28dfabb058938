//! axum router and listener for the gateway.

use super::{AskRequest, ErrorBody};
use crate::config::ServerConfig;
use crate::pipeline::Pipeline;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state handed to every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ask", post(ask_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            detail: detail.into(),
        }),
    )
        .into_response()
}

async fn ask_handler(State(state): State<AppState>, Json(request): Json<AskRequest>) -> Response {
    if request.prompt.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "prompt must not be empty");
    }

    match state.pipeline.process(&request.prompt).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) if e.is_blocked() => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unexpected error: {}", e),
        ),
    }
}

/// Health check endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let backends: Vec<&str> = state
        .pipeline
        .identities()
        .into_iter()
        .map(|id| id.as_str())
        .collect();
    let body = serde_json::json!({
        "status": "ok",
        "backends": backends,
        "uptime_secs": state.uptime_secs(),
    });
    Json(body)
}

/// Bind to `config.host:config.port` and serve until Ctrl-C.
pub async fn serve(config: &ServerConfig, pipeline: Arc<Pipeline>) -> Result<(), std::io::Error> {
    let app = router(AppState::new(pipeline));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "Edu-Guard API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Edu-Guard API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::AllowAllModerator;
    use crate::providers::MockAnswerer;
    use crate::retrieval::StaticRetriever;
    use axum::body::Body;
    use tower::ServiceExt;

    fn app() -> Router {
        let pipeline = Pipeline::single(
            Arc::new(AllowAllModerator),
            Arc::new(StaticRetriever::new("ctx")),
            Arc::new(MockAnswerer::with_response("42")),
        );
        router(AppState::new(Arc::new(pipeline)))
    }

    #[test]
    fn test_uptime_starts_near_zero() {
        let state = AppState::new(Arc::new(Pipeline::single(
            Arc::new(AllowAllModerator),
            Arc::new(StaticRetriever::new("")),
            Arc::new(MockAnswerer::with_response("")),
        )));
        assert!(state.uptime_secs() < 2);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let req = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(app(), req)
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["backends"], serde_json::json!(["default"]));
    }

    #[tokio::test]
    async fn test_ask_rejects_blank_prompt() {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"prompt": "   "}"#))
            .unwrap();

        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 400);
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "prompt must not be empty");
    }

    #[tokio::test]
    async fn test_ask_rejects_malformed_json() {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let resp = app().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }
}
