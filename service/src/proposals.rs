//! Proposal lifecycle: keyed upserts, the stuck-decision retry pass, and the
//! hard retry bound that keeps approval loops from spinning forever.

use chrono::Utc;
use serde_json::json;

use caseflow_core::case::CaseStatus;
use caseflow_core::keys;
use caseflow_core::proposal::{ActionKind, MAX_EXECUTION_RETRIES, Proposal};
use caseflow_core::run::TriggerKind;

use crate::dispatch;
use crate::error::AppError;
use crate::notify::{Severity, log_activity};
use crate::state::AppState;
use crate::store::audit::{self, ReaperKind};
use crate::store::proposals::{self, NewProposal};
use crate::store::{cases, runs};
use crate::sweeps::SweepOutcome;

/// Insert-or-refresh the proposal for (case, action). At most one live
/// proposal per logical action per case.
pub async fn upsert_proposal(
    state: &AppState,
    case_id: i64,
    action_kind: ActionKind,
    summary: String,
    payload: serde_json::Value,
) -> Result<Proposal, AppError> {
    let proposal = proposals::upsert(
        &state.db,
        &NewProposal {
            case_id,
            action_kind,
            dedup_key: keys::proposal_dedup_key(case_id, action_kind),
            summary,
            payload,
        },
    )
    .await?;

    tracing::debug!(
        case_id,
        proposal_id = %proposal.id,
        action = action_kind.as_str(),
        "proposal upserted"
    );
    Ok(proposal)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempts remain: bump the counter and re-dispatch.
    Retry,
    /// The bound is spent: dismiss and escalate, never silently.
    Dismiss,
}

pub fn retry_decision(execution_retries: i32) -> RetryDecision {
    if execution_retries >= MAX_EXECUTION_RETRIES {
        RetryDecision::Dismiss
    } else {
        RetryDecision::Retry
    }
}

/// Periodic pass over approved proposals whose execution never progressed:
/// still in `decision_received`, unchanged past the stuck window.
pub async fn check_stuck_decisions(state: &AppState) -> Result<SweepOutcome, AppError> {
    let cutoff = Utc::now() - state.config.decision_stuck_after;
    let stuck =
        proposals::select_stuck_decisions(&state.db, cutoff, state.config.sweep_batch_limit)
            .await?;

    let mut outcome = SweepOutcome::scanned(stuck.len());
    for proposal in stuck {
        match retry_one(state, &proposal).await {
            Ok(true) => outcome.acted += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                outcome.failed += 1;
                tracing::error!(
                    error = ?e,
                    proposal_id = %proposal.id,
                    case_id = proposal.case_id,
                    "stuck-decision handling failed"
                );
            }
        }
    }
    Ok(outcome)
}

async fn retry_one(state: &AppState, proposal: &Proposal) -> Result<bool, AppError> {
    // A run already working the case will move the proposal along itself.
    if runs::find_active_for_case(&state.db, proposal.case_id)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    match retry_decision(proposal.execution_retries) {
        RetryDecision::Dismiss => {
            let dismissed =
                proposals::dismiss(&state.db, proposal.id, "execution_retry_exhausted").await?;
            if !dismissed {
                return Ok(false);
            }

            cases::set_status(&state.db, proposal.case_id, CaseStatus::NeedsHumanReview).await?;
            audit::append_reaper_log(
                &state.db,
                ReaperKind::StuckDecision,
                "proposal",
                &proposal.id.to_string(),
                proposal.case_id,
                "dismissed_retry_exhausted",
                json!({ "execution_retries": proposal.execution_retries }),
            )
            .await;
            // The reviewer gets the whole trail, not a bare error code.
            log_activity(
                &state.db,
                proposal.case_id,
                "proposal_retry_exhausted",
                &format!(
                    "Approved '{}' proposal failed to execute after {} retries; \
                     case escalated for human review",
                    proposal.action_kind.as_str(),
                    proposal.execution_retries
                ),
                json!({
                    "proposal_id": proposal.id,
                    "action_kind": proposal.action_kind.as_str(),
                    "summary": proposal.summary,
                    "execution_retries": proposal.execution_retries,
                    "decided_at": proposal.decided_at,
                }),
            )
            .await;
            state.notifier.notify(
                Severity::Critical,
                "Proposal execution retries exhausted; case escalated",
                json!({ "case_id": proposal.case_id, "proposal_id": proposal.id }),
            );
            Ok(true)
        }
        RetryDecision::Retry => {
            let Some(retries) =
                proposals::increment_execution_retries(&state.db, proposal.id).await?
            else {
                // Settled between select and update.
                return Ok(false);
            };

            let dispatched = dispatch::dispatch(
                state,
                proposal.case_id,
                TriggerKind::ResumeRetry,
                None,
                "stuck_decision_sweep",
                Some(format!("retry-{}", retries)),
            )
            .await?;

            tracing::info!(
                proposal_id = %proposal.id,
                case_id = proposal.case_id,
                retries,
                dispatched = dispatched.dispatched,
                reason = dispatched.reason.as_deref().unwrap_or(""),
                "stuck proposal re-dispatched"
            );
            Ok(dispatched.dispatched)
        }
    }
}

#[cfg(test)]
mod tests {
    use caseflow_core::proposal::MAX_EXECUTION_RETRIES;

    use super::{RetryDecision, retry_decision};

    #[test]
    fn retries_until_the_bound() {
        assert_eq!(retry_decision(0), RetryDecision::Retry);
        assert_eq!(retry_decision(MAX_EXECUTION_RETRIES - 1), RetryDecision::Retry);
    }

    #[test]
    fn dismisses_at_and_past_the_bound() {
        assert_eq!(retry_decision(MAX_EXECUTION_RETRIES), RetryDecision::Dismiss);
        assert_eq!(retry_decision(MAX_EXECUTION_RETRIES + 3), RetryDecision::Dismiss);
    }
}
