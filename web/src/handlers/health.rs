//! Heartbeat endpoints.
//!
//! Used by load balancers and orchestrators to check that the process is
//! up. Neither endpoint looks at the broker or any other dependency.

use axum::{Json, Router, routing::get};
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests
    pub status: &'static str,
}

/// Plain-text heartbeat.
///
/// ```text
/// GET /ping  ->  200 "pong"
/// ```
#[allow(clippy::unused_async)]
pub async fn ping() -> &'static str {
    "pong"
}

/// JSON liveness check.
///
/// ```text
/// GET /health  ->  200 {"status":"ok"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Router serving `/ping` and `/health`, ready to be merged into a larger one.
pub fn heartbeat_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health_check))
}
