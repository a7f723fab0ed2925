use axum::{extract::State, http::StatusCode, response::Json};
use tracing::{instrument, warn};

use crate::schemas::{AppState, HealthResponse};

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Both stores reachable", body = HealthResponse),
        (status = 503, description = "A store is unreachable", body = HealthResponse)
    )
)]
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let primary = state.primary.ping().await;
    let accounting = state.secondary.ping().await;
    if let Err(e) = &primary {
        warn!("Primary store ping failed: {}", e);
    }
    if let Err(e) = &accounting {
        warn!("Accounting store ping failed: {}", e);
    }

    let healthy = primary.is_ok() && accounting.is_ok();
    let status_of = |ok: bool| if ok { "connected" } else { "disconnected" }.to_string();
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        primary: status_of(primary.is_ok()),
        accounting: status_of(accounting.is_ok()),
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
