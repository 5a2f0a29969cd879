//! Follow-up sweep: finds schedules whose next cycle is due and dispatches a
//! followup run for each, guarded by a per-cycle scheduled key so re-running
//! the sweep inside the same cycle is a no-op.

use chrono::{NaiveDate, Utc};

use caseflow_core::follow_up::FollowUpSchedule;
use caseflow_core::keys;
use caseflow_core::run::TriggerKind;

use super::SweepOutcome;
use crate::dispatch;
use crate::error::AppError;
use crate::state::AppState;
use crate::store::follow_ups;

pub async fn run(state: &AppState) -> Result<SweepOutcome, AppError> {
    let due = follow_ups::select_due(&state.db, state.config.sweep_batch_limit).await?;
    let today = Utc::now()
        .with_timezone(&state.config.sweep_timezone)
        .date_naive();

    let mut outcome = SweepOutcome::scanned(due.len());
    for schedule in due {
        match process_one(state, &schedule, today).await {
            Ok(true) => outcome.acted += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                outcome.failed += 1;
                tracing::error!(
                    error = ?e,
                    case_id = schedule.case_id,
                    "follow-up cycle failed"
                );
            }
        }
    }
    Ok(outcome)
}

async fn process_one(
    state: &AppState,
    schedule: &FollowUpSchedule,
    today: NaiveDate,
) -> Result<bool, AppError> {
    let key = keys::scheduled_key(schedule.case_id, schedule.follow_ups_sent, today);

    // Same key already recorded ⇒ this cycle already ran.
    if schedule.scheduled_key.as_deref() == Some(key.as_str()) {
        return Ok(false);
    }

    // Claim the cycle; losing the claim means another instance has it.
    if !follow_ups::claim_cycle(&state.db, schedule.case_id, &key).await? {
        return Ok(false);
    }

    let result = dispatch::dispatch(
        state,
        schedule.case_id,
        TriggerKind::FollowupTrigger,
        None,
        "follow_up_sweep",
        None,
    )
    .await;

    match result {
        Ok(outcome) if outcome.dispatched => {
            let next_due = Utc::now() + state.config.follow_up_cadence;
            follow_ups::complete_cycle(&state.db, schedule.case_id, next_due).await?;
            Ok(true)
        }
        Ok(outcome) => {
            // Case wasn't eligible after all (active run, status change).
            // Release the claim so a later pass can retry the cycle.
            tracing::debug!(
                case_id = schedule.case_id,
                reason = outcome.reason.as_deref().unwrap_or(""),
                "follow-up cycle released without dispatch"
            );
            follow_ups::release_cycle(&state.db, schedule.case_id).await?;
            Ok(false)
        }
        Err(e) => {
            follow_ups::record_failure(
                &state.db,
                schedule.case_id,
                &format!("dispatch failed: {:?}", e),
                state.config.follow_up_max_errors,
            )
            .await?;
            Err(e)
        }
    }
}
