use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use caseflow_core::error::ApiError;
use caseflow_core::proposal::Proposal;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::proposals;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/cases/{case_id}/proposals", get(list_case_proposals))
        .route("/v1/proposals/{proposal_id}/decision", post(record_decision))
}

/// Proposals for a case, newest first.
#[utoipa::path(
    get,
    path = "/v1/cases/{case_id}/proposals",
    params(("case_id" = i64, Path, description = "Case id")),
    responses(
        (status = 200, description = "Proposals for the case", body = [Proposal])
    ),
    tag = "proposals"
)]
pub async fn list_case_proposals(
    State(state): State<AppState>,
    Path(case_id): Path<i64>,
) -> Result<Json<Vec<Proposal>>, AppError> {
    let proposals = proposals::list_for_case(&state.db, case_id).await?;
    Ok(Json(proposals))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DecisionRequest {
    pub approve: bool,
    /// Reviewer's decision payload, stored verbatim on the proposal.
    #[serde(default)]
    pub decision: serde_json::Value,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DecisionResponse {
    pub proposal_id: Uuid,
    pub status: String,
}

/// Record a human decision on a pending proposal. Approval parks the
/// proposal in `decision_received`; the post-approval pipeline (or the
/// stuck-decision sweep) takes it from there.
#[utoipa::path(
    post,
    path = "/v1/proposals/{proposal_id}/decision",
    params(("proposal_id" = Uuid, Path, description = "Proposal id")),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "Decision recorded", body = DecisionResponse),
        (status = 404, description = "Proposal not found", body = ApiError),
        (status = 409, description = "Proposal already settled", body = ApiError)
    ),
    tag = "proposals"
)]
pub async fn record_decision(
    State(state): State<AppState>,
    Path(proposal_id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<DecisionResponse>, AppError> {
    let Some(_proposal) = proposals::fetch(&state.db, proposal_id).await? else {
        return Err(AppError::NotFound {
            resource: format!("proposal {}", proposal_id),
        });
    };

    let applied =
        proposals::record_decision(&state.db, proposal_id, req.approve, req.decision).await?;
    if !applied {
        return Err(AppError::Conflict {
            message: "Proposal is no longer awaiting a decision".to_string(),
        });
    }

    Ok(Json(DecisionResponse {
        proposal_id,
        status: if req.approve {
            "decision_received".to_string()
        } else {
            "dismissed".to_string()
        },
    }))
}
