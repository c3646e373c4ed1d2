// Web server: Axum-based JSON API in front of the extraction service.
//
// Routes:
//   GET  /                  service banner
//   GET  /health            liveness probe
//   POST /keywords/extract  { "text": ... } -> { "keywords": [...] }

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::keywords::service::KeywordExtractionService;

pub mod handlers;

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<KeywordExtractionService>,
    /// Longest accepted request text, in characters
    pub max_text_chars: usize,
    /// Overall budget for generation plus post-processing
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(service: Arc<KeywordExtractionService>, config: &Config) -> Self {
        Self {
            service,
            max_text_chars: config.max_text_chars,
            request_timeout: config.request_timeout,
        }
    }
}

/// Start the Axum web server and block until it exits.
pub async fn run_server(state: AppState, port: u16, bind: &str) -> Result<()> {
    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    info!("Keyphrase API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route(
            "/keywords/extract",
            post(handlers::keywords::extract_keywords),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Root route, confirms the API is up.
async fn root() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "message": "Программный модуль патентного поиска!" }))
}

/// Health check: always returns 200 OK.
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}
