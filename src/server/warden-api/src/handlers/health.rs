//! Health endpoint.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use warden_directory::HealthStatus;

use crate::state::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct Health {
    /// `ok`, or `degraded` when the directory is failing.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Last directory health check result.
    pub directory: HealthStatus,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let directory = state.directory_health.status();
    let (code, status) = match directory {
        HealthStatus::Unhealthy(_) => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
        HealthStatus::Healthy | HealthStatus::Unknown => (StatusCode::OK, "ok"),
    };

    (
        code,
        Json(Health {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            directory,
        }),
    )
}
