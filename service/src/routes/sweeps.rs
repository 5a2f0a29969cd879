use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};

use caseflow_core::error::ApiError;

use crate::error::AppError;
use crate::state::AppState;
use crate::sweeps::{self, SweepKind, SweepOutcome};

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/sweeps/{kind}", post(run_sweep))
}

/// Run a single pass of one sweep on demand. The same passes run on their
/// own timers; this exists for operators and tests.
#[utoipa::path(
    post,
    path = "/v1/sweeps/{kind}",
    params(
        ("kind" = String, Path, description = "One of: follow_up, deadline, orphan, stuck_decision, stale_queued, stuck_locks, stale_runs")
    ),
    responses(
        (status = 200, description = "Sweep pass summary", body = SweepOutcome),
        (status = 400, description = "Unknown sweep kind", body = ApiError)
    ),
    tag = "sweeps"
)]
pub async fn run_sweep(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<SweepOutcome>, AppError> {
    let Some(kind) = SweepKind::parse(&kind) else {
        return Err(AppError::Validation {
            message: format!("unknown sweep kind '{}'", kind),
            field: Some("kind".to_string()),
            received: Some(serde_json::Value::String(kind)),
            docs_hint: Some(
                "One of: follow_up, deadline, orphan, stuck_decision, stale_queued, \
                 stuck_locks, stale_runs"
                    .to_string(),
            ),
        });
    };

    let outcome = sweeps::run_once(&state, kind).await?;
    Ok(Json(outcome))
}
