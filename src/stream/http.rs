//! HTTP surface: the SSE run endpoint and the fallback metrics query.
//!
//! # Routes
//!
//! - `POST /v1/agent/stream` - Run the agent, streaming events as SSE
//! - `GET /v1/metrics/fallback` - Aggregate fallback metrics (query: tool)
//! - `GET /health` - Liveness probe

use crate::agent::{ReActController, RunRequest};
use crate::fallback::{FallbackMetrics, MetricsCollector};
use crate::stream::{spawn_run, sse_frames};
use crate::tools::ToolSet;
use crate::types::GroundingMode;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Defaults applied when a request leaves a field out.
#[derive(Debug, Clone)]
pub struct RunDefaults {
    pub system_prompt: String,
    pub max_iterations: u32,
    pub grounding_mode: GroundingMode,
}

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<ReActController>,
    pub tools: Arc<ToolSet>,
    pub metrics: Arc<MetricsCollector>,
    pub defaults: RunDefaults,
    /// Channel capacity between a run and its SSE response.
    pub stream_buffer: usize,
    /// Parent of every run's token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub message: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub grounding_mode: Option<GroundingMode>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub tool: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/agent/stream", post(stream_agent))
        .route("/v1/metrics/fallback", get(fallback_metrics))
        .route("/health", get(health))
        .with_state(state)
}

/// Wrap a frame stream in a `text/event-stream` response.
pub fn sse_response<S>(frames: S) -> Response
where
    S: Stream<Item = String> + Send + 'static,
{
    let mut response = Response::new(Body::from_stream(frames.map(Ok::<_, Infallible>)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// POST /v1/agent/stream
async fn stream_agent(
    State(state): State<AppState>,
    Json(body): Json<StreamRequest>,
) -> Response {
    if body.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "message must not be empty"})),
        )
            .into_response();
    }

    let request = RunRequest::new(body.message, state.tools.clone())
        .with_system_prompt(
            body.system_prompt
                .unwrap_or_else(|| state.defaults.system_prompt.clone()),
        )
        .with_max_iterations(body.max_iterations.unwrap_or(state.defaults.max_iterations))
        .with_grounding_mode(body.grounding_mode.unwrap_or(state.defaults.grounding_mode));

    info!(
        "Streaming run requested (max {} iterations)",
        request.max_iterations
    );
    let handle = spawn_run(
        state.controller.clone(),
        request,
        state.stream_buffer,
        state.shutdown.child_token(),
    );
    sse_response(sse_frames(handle))
}

/// GET /v1/metrics/fallback?tool=lookup_medication_instructions
async fn fallback_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Json<FallbackMetrics> {
    Json(state.metrics.fallback_metrics(query.tool.as_deref()))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Bind `addr` and serve until the state's shutdown token fires.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", listener.local_addr()?);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped");
    Ok(())
}
