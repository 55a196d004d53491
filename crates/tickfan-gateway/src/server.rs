//! HTTP surface: the WebSocket upgrade plus the observability endpoints.
//!
//! `/stats` serves the JSON snapshot, `/metrics` the Prometheus text
//! exposition of the same registry. `/ready` reports readiness only while
//! the upstream connection is streaming, so a load balancer will not route
//! peers at a process that has nothing to fan out yet.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use tickfan_core::metrics;
use tickfan_core::supervisor::SupervisorState;

use crate::ws::{ws_handler, GatewayState};

pub fn app(state: GatewayState) -> axum::Router {
    axum::Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .merge(stats_app())
}

/// The observability routes alone, for deployments that bind them to a
/// separate (non-public) address.
pub fn stats_app() -> axum::Router {
    axum::Router::new()
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
}

async fn stats_handler() -> impl IntoResponse {
    Json(metrics::snapshot())
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ready_handler() -> impl IntoResponse {
    if metrics::supervisor_state() == SupervisorState::Streaming {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "upstream not streaming")
    }
}
