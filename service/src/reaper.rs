//! Liveness recovery for runs whose worker stopped signalling. TTL-based
//! polling, not consensus: the system tolerates eventual detection, so a
//! lapsed lease observed by the next sweep cycle is good enough.

use chrono::Utc;
use serde_json::json;

use caseflow_core::run::AgentRun;

use crate::error::AppError;
use crate::notify::{Severity, log_activity};
use crate::state::AppState;
use crate::store::audit::{self, ReaperKind};
use crate::store::runs;
use crate::sweeps::SweepOutcome;

/// Force-release locks whose lease lapsed: the run is `running`, the lock is
/// recorded, and no heartbeat arrived within the lock TTL.
pub async fn reap_stuck_locks(state: &AppState) -> Result<SweepOutcome, AppError> {
    let stuck = runs::select_expired_locks(&state.db, state.config.sweep_batch_limit).await?;

    let mut outcome = SweepOutcome::scanned(stuck.len());
    for run in stuck {
        match recover_run(state, &run, ReaperKind::StuckLock).await {
            Ok(true) => outcome.acted += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                outcome.failed += 1;
                tracing::error!(error = ?e, run_id = %run.id, "stuck-lock recovery failed");
            }
        }
    }
    Ok(outcome)
}

/// Broader net: any `running` run silent past the run-stale TTL, whether or
/// not it ever recorded lock acquisition. Catches workers that crashed
/// between claiming the run and writing the lock fields.
pub async fn reap_stale_runs(state: &AppState) -> Result<SweepOutcome, AppError> {
    let cutoff = Utc::now() - state.config.run_stale_ttl;
    let stale =
        runs::select_stale_running(&state.db, cutoff, state.config.sweep_batch_limit).await?;

    let mut outcome = SweepOutcome::scanned(stale.len());
    for run in stale {
        match recover_run(state, &run, ReaperKind::StaleRun).await {
            Ok(true) => outcome.acted += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                outcome.failed += 1;
                tracing::error!(error = ?e, run_id = %run.id, "stale-run recovery failed");
            }
        }
    }
    Ok(outcome)
}

/// Shared recovery: mark the run dead, release the case, leave an audit
/// trail. Returns false when another instance recovered the run first.
async fn recover_run(
    state: &AppState,
    run: &AgentRun,
    kind: ReaperKind,
) -> Result<bool, AppError> {
    let error = match kind {
        ReaperKind::StuckLock => "lock expired without heartbeat; reaped",
        _ => "run went stale without liveness signals; reaped",
    };

    let recovered = runs::recover_to_failed_stale(&state.db, run.id, error).await?;
    if !recovered {
        return Ok(false);
    }

    audit::append_reaper_log(
        &state.db,
        kind,
        "agent_run",
        &run.id.to_string(),
        run.case_id,
        "force_released_and_failed_stale",
        json!({
            "started_at": run.started_at,
            "heartbeat_at": run.heartbeat_at,
            "lock_key": run.lock_key,
            "lock_expires_at": run.lock_expires_at,
        }),
    )
    .await;

    state.notifier.notify(
        Severity::Warning,
        "Stale run reaped; case released for a fresh dispatch",
        json!({
            "case_id": run.case_id,
            "run_id": run.id,
            "reaper": kind.as_str(),
        }),
    );

    log_activity(
        &state.db,
        run.case_id,
        "run_reaped",
        &format!("Run {} recovered by the {} reaper", run.id, kind.as_str()),
        json!({ "run_id": run.id, "reaper": kind.as_str() }),
    )
    .await;

    tracing::warn!(
        run_id = %run.id,
        case_id = run.case_id,
        reaper = kind.as_str(),
        "reaped stale run"
    );

    Ok(true)
}
