//! Dispatch gateway: turns "case X is ready for processing" into exactly one
//! idempotent submission to the execution platform, and recovers submissions
//! that never made it.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use caseflow_core::case::CaseStatus;
use caseflow_core::keys;
use caseflow_core::run::{AgentRun, TriggerKind, metadata};

use crate::error::{AppError, is_unique_violation};
use crate::notify::{Severity, log_activity};
use crate::platform::{StatusBucket, SubmitOptions};
use crate::state::AppState;
use crate::store::audit::{self, ReaperKind};
use crate::store::runs::{self, NewRun};
use crate::store::{cases, proposals};
use crate::sweeps::SweepOutcome;

/// Result of a dispatch attempt. `dispatched: false` is not an error — the
/// reason says why the case was left alone.
#[derive(Debug, Serialize, ToSchema)]
pub struct DispatchOutcome {
    pub dispatched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl DispatchOutcome {
    fn dispatched(run_id: Uuid) -> Self {
        Self {
            dispatched: true,
            reason: None,
            run_id: Some(run_id),
        }
    }

    fn rejected(reason: String, run_id: Option<Uuid>) -> Self {
        Self {
            dispatched: false,
            reason: Some(reason),
            run_id,
        }
    }
}

/// Why a case status blocks dispatch, or None when it is dispatchable.
pub fn dispatch_rejection(status: CaseStatus) -> Option<String> {
    if status.is_dispatchable() {
        None
    } else if status.is_already_satisfied() {
        Some(format!("already_{}", status.as_str()))
    } else {
        Some(format!("unexpected_status_{}", status.as_str()))
    }
}

/// Task kind submitted to the platform for a given trigger.
pub fn task_kind_for(trigger: TriggerKind) -> &'static str {
    match trigger {
        TriggerKind::InitialRequest => "initial_request",
        TriggerKind::FollowupTrigger => "followup_send",
        TriggerKind::InboundMessage
        | TriggerKind::ResumeRetry
        | TriggerKind::ManualReview
        | TriggerKind::Reset => "case_decision",
    }
}

/// Identity-based dedup only guards the decision pipeline, and trigger kinds
/// that intentionally supersede prior runs bypass it.
pub fn identity_dedup_applies(trigger: TriggerKind) -> bool {
    task_kind_for(trigger) == "case_decision" && !trigger.supersedes_duplicates()
}

/// Dispatch a new run for a case.
///
/// The exclusivity invariant is enforced twice: a pre-check query for the
/// common case, and the partial unique index on `agent_runs` as the race
/// safety net. Losing the insert race is success-equivalent.
pub async fn dispatch(
    state: &AppState,
    case_id: i64,
    trigger: TriggerKind,
    message_id: Option<i64>,
    source: &str,
    key_salt: Option<String>,
) -> Result<DispatchOutcome, AppError> {
    let Some(case) = cases::fetch(&state.db, case_id).await? else {
        return Err(AppError::NotFound {
            resource: format!("case {}", case_id),
        });
    };

    if let Some(reason) = dispatch_rejection(case.status) {
        tracing::debug!(case_id, source, reason = %reason, "dispatch rejected by case status");
        return Ok(DispatchOutcome::rejected(reason, None));
    }

    if let Some(active) = runs::find_active_for_case(&state.db, case_id).await? {
        return Ok(DispatchOutcome::rejected(
            "active_run_exists".to_string(),
            Some(active.id),
        ));
    }

    let run_id = Uuid::now_v7();
    let new_run = NewRun {
        id: run_id,
        case_id,
        trigger_kind: trigger,
        message_id,
        autopilot_enabled: case.autopilot_enabled,
        metadata: json!({ "source": source }),
    };

    if let Err(e) = runs::insert_queued(&state.db, &new_run).await {
        if is_unique_violation(&e) {
            // Another dispatcher won the race. Same end state we wanted.
            let survivor = runs::find_active_for_case(&state.db, case_id).await?;
            return Ok(DispatchOutcome::rejected(
                "active_run_exists".to_string(),
                survivor.map(|r| r.id),
            ));
        }
        return Err(e.into());
    }

    let run = runs::fetch(&state.db, run_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("run {} vanished after insert", run_id)))?;

    match trigger_task(state, &run, source, key_salt).await? {
        TriggerResult::Superseded { survivor } => Ok(DispatchOutcome::rejected(
            "superseded_by_existing_run".to_string(),
            Some(survivor),
        )),
        TriggerResult::Submitted { execution_id } => {
            let observed =
                verify_trigger_run_started(state, run_id, &execution_id).await?;
            tracing::info!(
                case_id,
                run_id = %run_id,
                execution_id = %execution_id,
                observed = observed.as_str(),
                source,
                "run dispatched"
            );
            log_activity(
                &state.db,
                case_id,
                "run_dispatched",
                &format!("Dispatched {} run", trigger.as_str()),
                json!({ "run_id": run_id, "source": source, "observed": observed.as_str() }),
            )
            .await;
            Ok(DispatchOutcome::dispatched(run_id))
        }
    }
}

pub enum TriggerResult {
    Submitted { execution_id: String },
    /// A run with the same identity is already active; this run was
    /// cancelled locally instead of submitted.
    Superseded { survivor: Uuid },
}

/// Submit one run to the execution platform.
///
/// Two dedup layers, on purpose: identity-based dedup cancels a local
/// duplicate before it reaches the platform, and the idempotency key lets
/// the platform collapse duplicate submissions that slip through anyway.
pub async fn trigger_task(
    state: &AppState,
    run: &AgentRun,
    source: &str,
    key_salt: Option<String>,
) -> Result<TriggerResult, AppError> {
    let task_kind = task_kind_for(run.trigger_kind);

    if identity_dedup_applies(run.trigger_kind) {
        if let Some(survivor) = runs::find_active_duplicate(
            &state.db,
            run.case_id,
            run.trigger_kind,
            run.message_id,
            run.id,
        )
        .await?
        {
            runs::mark_cancelled_superseded(&state.db, run.id, survivor.id).await?;
            tracing::info!(
                run_id = %run.id,
                survivor = %survivor.id,
                case_id = run.case_id,
                "duplicate run cancelled before submission"
            );
            return Ok(TriggerResult::Superseded {
                survivor: survivor.id,
            });
        }
    }

    let idempotency_key = match &key_salt {
        None => keys::idempotency_key(task_kind, run.case_id, run.message_id, run.trigger_kind),
        Some(salt) => keys::salted_idempotency_key(
            task_kind,
            run.case_id,
            run.message_id,
            run.trigger_kind,
            salt,
        ),
    };

    let payload = json!({
        "case_id": run.case_id,
        "run_id": run.id,
        "trigger_kind": run.trigger_kind.as_str(),
        "message_id": run.message_id,
        "autopilot_enabled": run.autopilot_enabled,
        "source": source,
    });

    let receipt = match state
        .platform
        .submit(
            task_kind.to_string(),
            payload,
            SubmitOptions {
                idempotency_key: idempotency_key.clone(),
                idempotency_key_ttl_seconds: state.config.idempotency_key_ttl.num_seconds(),
            },
        )
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => {
            // Surface the failure; the run goes terminal so a later sweep
            // can retry the case with a fresh run.
            runs::mark_failed(&state.db, run.id, &format!("submission failed: {}", e)).await?;
            return Err(e.into());
        }
    };

    runs::merge_metadata(
        &state.db,
        run.id,
        json!({
            (metadata::TASK_RUN_ID): receipt.execution_id,
            (metadata::IDEMPOTENCY_KEY): idempotency_key,
            (metadata::DISPATCH_ATTEMPTS): run.dispatch_attempts() + 1,
        }),
    )
    .await?;

    Ok(TriggerResult::Submitted {
        execution_id: receipt.execution_id,
    })
}

/// Poll the platform until the submission is visibly accepted, terminally
/// failed, or the verification window closes. Uncertainty is not an error:
/// the last observed bucket is recorded and the stale-queued sweep owns any
/// further action.
pub async fn verify_trigger_run_started(
    state: &AppState,
    run_id: Uuid,
    execution_id: &str,
) -> Result<StatusBucket, AppError> {
    let window = state
        .config
        .verify_window
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(90));
    let poll = state
        .config
        .verify_poll_interval
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(5));
    let deadline = tokio::time::Instant::now() + window;

    let mut last_observed = StatusBucket::Unknown;
    loop {
        match state.platform.get_status(execution_id.to_string()).await {
            Ok(bucket) => {
                last_observed = bucket;
                if bucket.is_started() {
                    break;
                }
                if bucket.is_terminal_failure() {
                    runs::mark_failed(
                        &state.db,
                        run_id,
                        &format!("platform reported {} during verification", bucket.as_str()),
                    )
                    .await?;
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, execution_id, "status poll failed during verification");
            }
        }

        if tokio::time::Instant::now() + poll > deadline {
            tracing::warn!(
                run_id = %run_id,
                execution_id,
                last_observed = last_observed.as_str(),
                "gave up verifying submission inside the window"
            );
            break;
        }
        tokio::time::sleep(poll).await;
    }

    runs::merge_metadata(
        &state.db,
        run_id,
        json!({ (metadata::LAST_PLATFORM_STATUS): last_observed.as_str() }),
    )
    .await?;

    Ok(last_observed)
}

/// What to do with a run stuck in `queued`, given what the platform says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The remote side is progressing, or we cannot tell. Hands off — a
    /// duplicate born of uncertainty is worse than a slow run.
    Leave,
    /// Remote terminal failure: mirror it locally.
    MarkFailed,
    /// Remote completed: reconcile the local row.
    ReconcileCompleted,
    /// Remote never started; attempts remain. Replace with a fresh run.
    Replace,
    /// Remote never started and attempts are exhausted.
    FailPermanently,
}

pub fn recovery_action(
    remote: Option<StatusBucket>,
    attempts: i64,
    max_attempts: i64,
) -> RecoveryAction {
    match remote {
        Some(bucket) if bucket.is_terminal_failure() => RecoveryAction::MarkFailed,
        Some(StatusBucket::Completed) => RecoveryAction::ReconcileCompleted,
        Some(StatusBucket::Accepted) | Some(StatusBucket::Running) => RecoveryAction::Leave,
        None | Some(StatusBucket::Unknown) => RecoveryAction::Leave,
        Some(StatusBucket::Pending) => {
            if attempts < max_attempts {
                RecoveryAction::Replace
            } else {
                RecoveryAction::FailPermanently
            }
        }
        // is_terminal_failure covered Failed and Cancelled above.
        Some(_) => RecoveryAction::Leave,
    }
}

/// Sweep over runs stuck in `queued` past the age bound that carry a
/// correlation id, and repair them according to the platform's view.
pub async fn recover_stale_queued_runs(state: &AppState) -> Result<SweepOutcome, AppError> {
    let cutoff = Utc::now() - state.config.stale_queued_max_age;
    let stale = runs::select_stale_queued(&state.db, cutoff, state.config.sweep_batch_limit).await?;

    let mut outcome = SweepOutcome::scanned(stale.len());
    for run in stale {
        match recover_one_queued(state, &run).await {
            Ok(recovered) => {
                if recovered {
                    outcome.acted += 1;
                } else {
                    outcome.skipped += 1;
                }
            }
            Err(e) => {
                outcome.failed += 1;
                tracing::error!(
                    error = ?e,
                    run_id = %run.id,
                    case_id = run.case_id,
                    "stale-queued recovery failed for run"
                );
            }
        }
    }
    Ok(outcome)
}

async fn recover_one_queued(state: &AppState, run: &AgentRun) -> Result<bool, AppError> {
    let execution_id = run
        .metadata_str(metadata::TASK_RUN_ID)
        .unwrap_or_default()
        .to_string();

    let remote = match state.platform.get_status(execution_id.clone()).await {
        Ok(bucket) if bucket == StatusBucket::Unknown => None,
        Ok(bucket) => Some(bucket),
        Err(e) => {
            tracing::warn!(error = %e, run_id = %run.id, "could not determine remote status");
            None
        }
    };

    let attempts = run.dispatch_attempts();
    let action = recovery_action(remote, attempts, state.config.stale_queued_max_attempts);

    match action {
        RecoveryAction::Leave => Ok(false),
        RecoveryAction::MarkFailed => {
            runs::mark_failed(&state.db, run.id, "platform reported terminal failure").await?;
            audit::append_reaper_log(
                &state.db,
                ReaperKind::StaleQueued,
                "agent_run",
                &run.id.to_string(),
                run.case_id,
                "marked_failed",
                json!({ "remote_status": remote.map(|b| b.as_str()), "attempts": attempts }),
            )
            .await;
            Ok(true)
        }
        RecoveryAction::ReconcileCompleted => {
            runs::mark_completed(&state.db, run.id).await?;
            audit::append_reaper_log(
                &state.db,
                ReaperKind::StaleQueued,
                "agent_run",
                &run.id.to_string(),
                run.case_id,
                "reconciled_completed",
                json!({ "execution_id": execution_id }),
            )
            .await;
            Ok(true)
        }
        RecoveryAction::Replace => {
            replace_queued_run(state, run, attempts).await?;
            Ok(true)
        }
        RecoveryAction::FailPermanently => {
            runs::mark_failed(&state.db, run.id, "dispatch_attempts_exhausted").await?;
            cases::set_status(&state.db, run.case_id, CaseStatus::NeedsHumanReview).await?;
            audit::append_reaper_log(
                &state.db,
                ReaperKind::StaleQueued,
                "agent_run",
                &run.id.to_string(),
                run.case_id,
                "failed_permanently",
                json!({ "attempts": attempts }),
            )
            .await;
            state.notifier.notify(
                Severity::Critical,
                "Case dispatch exhausted its attempts and was escalated",
                json!({ "case_id": run.case_id, "run_id": run.id }),
            );
            log_activity(
                &state.db,
                run.case_id,
                "dispatch_exhausted",
                "Dispatch attempts exhausted; case escalated for human review",
                json!({ "run_id": run.id, "attempts": attempts }),
            )
            .await;
            Ok(true)
        }
    }
}

/// Fail the stuck run and re-dispatch the same unit of work as a fresh run
/// under a fresh (attempt-salted) idempotency key.
async fn replace_queued_run(state: &AppState, run: &AgentRun, attempts: i64) -> Result<(), AppError> {
    let replacement_id = Uuid::now_v7();

    runs::merge_metadata(
        &state.db,
        run.id,
        json!({ (metadata::REPLACED_BY): replacement_id.to_string() }),
    )
    .await?;
    runs::mark_failed(&state.db, run.id, "stale in queued; replaced").await?;

    let new_run = NewRun {
        id: replacement_id,
        case_id: run.case_id,
        trigger_kind: run.trigger_kind,
        message_id: run.message_id,
        autopilot_enabled: run.autopilot_enabled,
        metadata: json!({
            "source": "stale_queued_recovery",
            (metadata::DISPATCH_ATTEMPTS): attempts,
        }),
    };
    if let Err(e) = runs::insert_queued(&state.db, &new_run).await {
        if is_unique_violation(&e) {
            // Someone else gave the case a run between our fail and insert.
            tracing::info!(case_id = run.case_id, "replacement lost the insert race");
            return Ok(());
        }
        return Err(e.into());
    }

    let replacement = runs::fetch(&state.db, replacement_id)
        .await?
        .ok_or_else(|| AppError::Internal("replacement run vanished after insert".to_string()))?;

    let salt = (attempts + 1).to_string();
    match trigger_task(state, &replacement, "stale_queued_recovery", Some(salt)).await {
        Ok(_) => {}
        Err(AppError::Platform(e)) => {
            // Already marked failed by trigger_task; the next sweep retries.
            tracing::warn!(error = %e, run_id = %replacement_id, "replacement submission failed");
        }
        Err(e) => return Err(e),
    }

    audit::append_reaper_log(
        &state.db,
        ReaperKind::StaleQueued,
        "agent_run",
        &run.id.to_string(),
        run.case_id,
        "replaced",
        json!({ "replacement_run_id": replacement_id, "attempt": attempts + 1 }),
    )
    .await;

    Ok(())
}

/// Count of dismissed proposals, used by sweeps to decide whether the case's
/// circuit breaker has tripped.
pub async fn circuit_breaker_tripped(state: &AppState, case_id: i64) -> Result<bool, AppError> {
    let dismissed = proposals::count_dismissed(&state.db, case_id).await?;
    Ok(dismissed >= caseflow_core::proposal::DISMISSED_CIRCUIT_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use caseflow_core::case::CaseStatus;
    use caseflow_core::run::TriggerKind;

    use super::{
        RecoveryAction, dispatch_rejection, identity_dedup_applies, recovery_action, task_kind_for,
    };
    use crate::platform::StatusBucket;

    #[test]
    fn dispatchable_statuses_pass() {
        assert_eq!(dispatch_rejection(CaseStatus::Ready), None);
        assert_eq!(dispatch_rejection(CaseStatus::AwaitingResponse), None);
        assert_eq!(dispatch_rejection(CaseStatus::NeedsFeeDecision), None);
    }

    #[test]
    fn satisfied_statuses_reject_with_already() {
        assert_eq!(
            dispatch_rejection(CaseStatus::Completed).as_deref(),
            Some("already_completed")
        );
        assert_eq!(
            dispatch_rejection(CaseStatus::SubmissionInProgress).as_deref(),
            Some("already_submission_in_progress")
        );
    }

    #[test]
    fn other_statuses_reject_with_unexpected() {
        assert_eq!(
            dispatch_rejection(CaseStatus::Draft).as_deref(),
            Some("unexpected_status_draft")
        );
        assert_eq!(
            dispatch_rejection(CaseStatus::NeedsHumanReview).as_deref(),
            Some("unexpected_status_needs_human_review")
        );
    }

    #[test]
    fn task_kinds_by_trigger() {
        assert_eq!(task_kind_for(TriggerKind::InitialRequest), "initial_request");
        assert_eq!(task_kind_for(TriggerKind::FollowupTrigger), "followup_send");
        assert_eq!(task_kind_for(TriggerKind::InboundMessage), "case_decision");
        assert_eq!(task_kind_for(TriggerKind::Reset), "case_decision");
    }

    #[test]
    fn dedup_skips_superseding_triggers_and_non_decision_kinds() {
        assert!(identity_dedup_applies(TriggerKind::InboundMessage));
        assert!(identity_dedup_applies(TriggerKind::ManualReview));
        assert!(!identity_dedup_applies(TriggerKind::Reset));
        assert!(!identity_dedup_applies(TriggerKind::ResumeRetry));
        assert!(!identity_dedup_applies(TriggerKind::FollowupTrigger));
        assert!(!identity_dedup_applies(TriggerKind::InitialRequest));
    }

    #[test]
    fn recovery_mirrors_remote_terminal_states() {
        assert_eq!(
            recovery_action(Some(StatusBucket::Failed), 1, 3),
            RecoveryAction::MarkFailed
        );
        assert_eq!(
            recovery_action(Some(StatusBucket::Cancelled), 1, 3),
            RecoveryAction::MarkFailed
        );
        assert_eq!(
            recovery_action(Some(StatusBucket::Completed), 1, 3),
            RecoveryAction::ReconcileCompleted
        );
    }

    #[test]
    fn recovery_leaves_progressing_and_uncertain_runs() {
        assert_eq!(
            recovery_action(Some(StatusBucket::Accepted), 1, 3),
            RecoveryAction::Leave
        );
        assert_eq!(
            recovery_action(Some(StatusBucket::Running), 1, 3),
            RecoveryAction::Leave
        );
        assert_eq!(recovery_action(None, 1, 3), RecoveryAction::Leave);
        assert_eq!(
            recovery_action(Some(StatusBucket::Unknown), 1, 3),
            RecoveryAction::Leave
        );
    }

    #[test]
    fn recovery_replaces_until_attempts_run_out() {
        assert_eq!(
            recovery_action(Some(StatusBucket::Pending), 0, 3),
            RecoveryAction::Replace
        );
        assert_eq!(
            recovery_action(Some(StatusBucket::Pending), 2, 3),
            RecoveryAction::Replace
        );
        assert_eq!(
            recovery_action(Some(StatusBucket::Pending), 3, 3),
            RecoveryAction::FailPermanently
        );
        assert_eq!(
            recovery_action(Some(StatusBucket::Pending), 7, 3),
            RecoveryAction::FailPermanently
        );
    }
}
