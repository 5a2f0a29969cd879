use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use caseflow_core::error::ApiError;
use caseflow_core::run::TriggerKind;

use crate::dispatch::{self, DispatchOutcome};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/cases/{case_id}/dispatch", post(dispatch_case))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DispatchRequest {
    /// Caller label carried into run metadata and logs (e.g. "reactive",
    /// "mail_webhook"). Defaults to "reactive".
    #[serde(default)]
    pub source: Option<String>,
    /// Trigger kind; inferred from message_id when omitted.
    #[serde(default)]
    pub trigger_kind: Option<String>,
    /// Inbound message that triggered this dispatch, when there is one.
    #[serde(default)]
    pub message_id: Option<i64>,
}

/// Infer the trigger when the caller didn't name one: an inbound message
/// means the decision pipeline; otherwise this is the initial request.
fn resolve_trigger(raw: Option<&str>, message_id: Option<i64>) -> Result<TriggerKind, AppError> {
    match raw {
        Some(value) => TriggerKind::parse(value).map_err(|_| AppError::Validation {
            message: format!("unknown trigger_kind '{}'", value),
            field: Some("trigger_kind".to_string()),
            received: Some(serde_json::Value::String(value.to_string())),
            docs_hint: Some(
                "One of: initial_request, followup_trigger, inbound_message, resume_retry, \
                 manual_review, reset"
                    .to_string(),
            ),
        }),
        None if message_id.is_some() => Ok(TriggerKind::InboundMessage),
        None => Ok(TriggerKind::InitialRequest),
    }
}

/// Reactive dispatch entry point: ask the gateway to start a run for a case.
#[utoipa::path(
    post,
    path = "/v1/cases/{case_id}/dispatch",
    params(
        ("case_id" = i64, Path, description = "Case id")
    ),
    request_body = DispatchRequest,
    responses(
        (status = 200, description = "Dispatch outcome (dispatched or reasoned rejection)", body = DispatchOutcome),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 404, description = "Case not found", body = ApiError),
        (status = 502, description = "Execution platform unavailable", body = ApiError)
    ),
    tag = "dispatch"
)]
pub async fn dispatch_case(
    State(state): State<AppState>,
    Path(case_id): Path<i64>,
    Json(req): Json<DispatchRequest>,
) -> Result<Json<DispatchOutcome>, AppError> {
    let trigger = resolve_trigger(req.trigger_kind.as_deref(), req.message_id)?;
    let source = req.source.unwrap_or_else(|| "reactive".to_string());

    let outcome =
        dispatch::dispatch(&state, case_id, trigger, req.message_id, &source, None).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use caseflow_core::run::TriggerKind;

    use super::resolve_trigger;

    #[test]
    fn explicit_trigger_wins() {
        assert_eq!(
            resolve_trigger(Some("reset"), Some(9)).unwrap(),
            TriggerKind::Reset
        );
    }

    #[test]
    fn message_implies_inbound() {
        assert_eq!(
            resolve_trigger(None, Some(9)).unwrap(),
            TriggerKind::InboundMessage
        );
    }

    #[test]
    fn bare_dispatch_is_initial_request() {
        assert_eq!(resolve_trigger(None, None).unwrap(), TriggerKind::InitialRequest);
    }

    #[test]
    fn unknown_trigger_is_a_validation_error() {
        assert!(resolve_trigger(Some("poke"), None).is_err());
    }
}
