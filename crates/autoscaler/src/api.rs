//! Health and metrics endpoint
//!
//! Read-only view of the controller: component health, run readiness and
//! the Prometheus registry. Nothing here touches decision state.

use anyhow::Context;
use autoscaler_lib::{
    health::{ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse},
    observability::ScalerMetrics,
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tracing::{info, warn};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Handles shared with the controller task
#[derive(Clone)]
pub struct AppState {
    pub health: HealthRegistry,
    pub metrics: ScalerMetrics,
}

impl AppState {
    pub fn new(health: HealthRegistry, metrics: ScalerMetrics) -> Self {
        Self { health, metrics }
    }
}

/// A degraded controller keeps running, so only unhealthy is a failure
async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let health = state.health.health().await;
    let code = match health.status {
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
    };
    (code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let readiness = state.health.readiness().await;
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until the process exits
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("cannot listen on metrics port {}", port))?;
    info!(addr = %listener.local_addr()?, "Serving health and metrics");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
