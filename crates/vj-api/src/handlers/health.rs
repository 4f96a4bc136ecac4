//! Health check handlers

use crate::cache::Cache;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use vj_core::UserStore;

/// Liveness response
#[derive(Serialize, ToSchema)]
pub struct PingResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub total_requests: u64,
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/ping",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive", body = PingResponse)
    )
)]
pub async fn ping(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(PingResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_secs(),
        total_requests: state.get_request_count(),
    })
}

/// Readiness response
#[derive(Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: ReadinessChecks,
}

#[derive(Serialize, ToSchema)]
pub struct ReadinessChecks {
    pub database: bool,
    pub cache: bool,
}

/// Readiness probe - checks the credential store and the cache
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessResponse),
        (status = 503, description = "A dependency is down", body = ReadinessResponse)
    )
)]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (database, cache) = futures::join!(state.store.health_check(), state.cache.ping());

    if let Err(e) = &database {
        warn!(error = %e, "Readiness: credential store unavailable");
    }
    if let Err(e) = &cache {
        warn!(error = %e, "Readiness: cache unavailable");
    }

    let checks = ReadinessChecks {
        database: database.is_ok(),
        cache: cache.is_ok(),
    };
    let ready = checks.database && checks.cache;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse { ready, checks }))
}
