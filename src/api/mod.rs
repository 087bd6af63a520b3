mod auth;
mod error;

use axum::{
    Json, Router,
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::{AuthMetrics, EventSink};

pub use auth::AuthState;
pub(crate) use auth::clamp_user_agent;
pub use error::ApiError;

use crate::rate_limit::RegisterLimiter;

/// Create the API router, mounted under `/api`.
pub fn create_api_router(state: AuthState, register_limiter: RegisterLimiter) -> Router {
    Router::new().nest("/auth", auth::router(state, register_limiter))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    name: &'static str,
    version: &'static str,
}

/// Liveness check.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics_snapshot(State(metrics): State<Arc<AuthMetrics>>) -> impl IntoResponse {
    Json(metrics.snapshot())
}

/// Router serving the metrics snapshot at `/metrics`.
pub fn metrics_router(metrics: Arc<AuthMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_snapshot))
        .with_state(metrics)
}

/// Middleware recording request latency per matched route.
pub async fn track_latency(
    State(metrics): State<Arc<AuthMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    metrics.observe_latency(&method, &route, response.status().as_u16(), start.elapsed());
    response
}
