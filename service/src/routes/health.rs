use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;
use crate::store::ACTIVE_RUN_STATUS_SQL;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Runs currently counted by the exclusivity invariant, across all cases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_runs: Option<i64>,
}

/// Health check endpoint — verifies the database is reachable and reports
/// how many runs are currently in flight.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let active_runs = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM agent_runs WHERE status IN {ACTIVE_RUN_STATUS_SQL}"
    ))
    .fetch_one(&state.db)
    .await
    .ok();

    let db_ok = active_runs.is_some();
    let status = if db_ok { "ok" } else { "degraded" };
    let http_status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_runs,
        }),
    )
}
