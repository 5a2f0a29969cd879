//! Orphan sweep: cases parked in a human-attention status for too long with
//! no open proposal get a synthesized fallback proposal, so nothing stalls
//! silently with no actionable next step.

use chrono::Utc;
use serde_json::json;

use caseflow_core::case::Case;
use caseflow_core::proposal::ActionKind;

use super::SweepOutcome;
use crate::dispatch;
use crate::error::AppError;
use crate::notify::Severity;
use crate::state::AppState;
use crate::store::cases;

/// Fallback action for an orphaned case. A tripped circuit breaker forces
/// escalation regardless of where the case is parked.
pub fn orphan_action(circuit_tripped: bool) -> ActionKind {
    if circuit_tripped {
        ActionKind::PhoneEscalation
    } else {
        ActionKind::HumanReview
    }
}

pub async fn run(state: &AppState) -> Result<SweepOutcome, AppError> {
    let parked_cutoff = Utc::now() - state.config.orphan_after;
    let orphaned =
        cases::select_orphaned(&state.db, parked_cutoff, state.config.sweep_batch_limit).await?;

    let mut outcome = SweepOutcome::scanned(orphaned.len());
    for case in orphaned {
        match process_one(state, &case).await {
            Ok(()) => outcome.acted += 1,
            Err(e) => {
                outcome.failed += 1;
                tracing::error!(error = ?e, case_id = case.id, "orphan handling failed");
            }
        }
    }
    Ok(outcome)
}

async fn process_one(state: &AppState, case: &Case) -> Result<(), AppError> {
    let tripped = dispatch::circuit_breaker_tripped(state, case.id).await?;
    let action = orphan_action(tripped);

    let proposal = crate::proposals::upsert_proposal(
        state,
        case.id,
        action,
        format!(
            "'{}' has been parked in {} with no open proposal; needs a decision",
            case.case_name,
            case.status.as_str()
        ),
        json!({
            "parked_status": case.status.as_str(),
            "parked_since": case.updated_at,
            "circuit_breaker_tripped": tripped,
        }),
    )
    .await?;

    state.notifier.notify(
        Severity::Warning,
        "Stalled case given a fallback proposal",
        json!({
            "case_id": case.id,
            "proposal_id": proposal.id,
            "action": action.as_str(),
        }),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use caseflow_core::proposal::ActionKind;

    use super::orphan_action;

    #[test]
    fn fallback_is_human_review_until_breaker_trips() {
        assert_eq!(orphan_action(false), ActionKind::HumanReview);
        assert_eq!(orphan_action(true), ActionKind::PhoneEscalation);
    }
}
