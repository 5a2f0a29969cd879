//! Run inspection plus the worker-facing lifecycle callbacks. Transitioning
//! to `running` implicitly acquires the case lock; heartbeats extend it.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use caseflow_core::error::ApiError;
use caseflow_core::run::AgentRun;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::runs;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/runs/{run_id}", get(get_run))
        .route("/v1/cases/{case_id}/runs", get(list_case_runs))
        .route("/v1/runs/{run_id}/started", post(run_started))
        .route("/v1/runs/{run_id}/heartbeat", post(run_heartbeat))
        .route("/v1/runs/{run_id}/completed", post(run_completed))
        .route("/v1/runs/{run_id}/failed", post(run_failed))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunTransitionResponse {
    pub run_id: Uuid,
    /// False when the run was not in a state that allows the transition
    /// (already recovered, cancelled, or racing another worker).
    pub applied: bool,
}

/// Fetch one run.
#[utoipa::path(
    get,
    path = "/v1/runs/{run_id}",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run", body = AgentRun),
        (status = 404, description = "Run not found", body = ApiError)
    ),
    tag = "runs"
)]
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<AgentRun>, AppError> {
    match runs::fetch(&state.db, run_id).await? {
        Some(run) => Ok(Json(run)),
        None => Err(AppError::NotFound {
            resource: format!("run {}", run_id),
        }),
    }
}

/// Recent runs for a case, newest first.
#[utoipa::path(
    get,
    path = "/v1/cases/{case_id}/runs",
    params(("case_id" = i64, Path, description = "Case id")),
    responses(
        (status = 200, description = "Runs for the case", body = [AgentRun])
    ),
    tag = "runs"
)]
pub async fn list_case_runs(
    State(state): State<AppState>,
    Path(case_id): Path<i64>,
) -> Result<Json<Vec<AgentRun>>, AppError> {
    let runs = runs::list_for_case(&state.db, case_id, 50).await?;
    Ok(Json(runs))
}

/// Worker callback: the run began executing. Acquires the case lock with a
/// fresh TTL lease.
#[utoipa::path(
    post,
    path = "/v1/runs/{run_id}/started",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Transition result", body = RunTransitionResponse)
    ),
    tag = "runs"
)]
pub async fn run_started(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunTransitionResponse>, AppError> {
    let applied = runs::mark_running(&state.db, run_id, state.config.lock_ttl).await?;
    Ok(Json(RunTransitionResponse { run_id, applied }))
}

/// Worker callback: still alive. Extends the lock lease.
#[utoipa::path(
    post,
    path = "/v1/runs/{run_id}/heartbeat",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Transition result", body = RunTransitionResponse)
    ),
    tag = "runs"
)]
pub async fn run_heartbeat(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunTransitionResponse>, AppError> {
    let applied = runs::update_heartbeat(&state.db, run_id, state.config.lock_ttl).await?;
    Ok(Json(RunTransitionResponse { run_id, applied }))
}

/// Worker callback: the run finished.
#[utoipa::path(
    post,
    path = "/v1/runs/{run_id}/completed",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Transition result", body = RunTransitionResponse)
    ),
    tag = "runs"
)]
pub async fn run_completed(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunTransitionResponse>, AppError> {
    runs::mark_completed(&state.db, run_id).await?;
    Ok(Json(RunTransitionResponse {
        run_id,
        applied: true,
    }))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RunFailedRequest {
    pub error: String,
}

/// Worker callback: the run failed.
#[utoipa::path(
    post,
    path = "/v1/runs/{run_id}/failed",
    params(("run_id" = Uuid, Path, description = "Run id")),
    request_body = RunFailedRequest,
    responses(
        (status = 200, description = "Transition result", body = RunTransitionResponse)
    ),
    tag = "runs"
)]
pub async fn run_failed(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(req): Json<RunFailedRequest>,
) -> Result<Json<RunTransitionResponse>, AppError> {
    runs::mark_failed(&state.db, run_id, &req.error).await?;
    Ok(Json(RunTransitionResponse {
        run_id,
        applied: true,
    }))
}
