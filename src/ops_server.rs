// HTTP server for operator endpoints
//
// Listens on the configured address (default: 127.0.0.1:9090):
// - GET  /health      liveness and active process count
// - GET  /metrics     Prometheus scrape endpoint
// - GET  /executions  running executions
// - POST /reset       terminate every running execution

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use tracing::{error, info, warn};

use crate::metrics;
use crate::tools::ToolExecutor;

/// Build the ops router for an executor
pub fn router(executor: ToolExecutor) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/executions", get(executions_handler))
        .route("/reset", post(reset_handler))
        .with_state(executor)
}

/// Start the ops HTTP server
///
/// # Arguments
/// * `addr` - Address to listen on
/// * `executor` - Executor whose registry the endpoints report on
/// * `shutdown` - Resolves when the server should stop accepting requests
pub async fn start_ops_server<F>(addr: SocketAddr, executor: ToolExecutor, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics::init().context("Failed to initialize metrics")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind ops server to {}", addr))?;

    info!("Starting ops server on {}", addr);

    axum::serve(listener, router(executor))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Ops server error")?;

    Ok(())
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler(State(executor): State<ToolExecutor>) -> Response {
    let registry = executor.registry();
    let status = if registry.is_shutting_down() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = json!({
        "status": if registry.is_shutting_down() { "shutting_down" } else { "ok" },
        "activeProcesses": registry.active_count(),
    });
    (status, Json(body)).into_response()
}

/// Running executions
async fn executions_handler(State(executor): State<ToolExecutor>) -> impl IntoResponse {
    Json(executor.list_active_executions())
}

/// Operator reset: terminate everything that is running
async fn reset_handler(State(executor): State<ToolExecutor>) -> impl IntoResponse {
    let terminated = executor.kill_all();
    warn!(terminated, "Operator reset requested");
    Json(json!({ "terminated": terminated }))
}
