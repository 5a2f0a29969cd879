//! Periodic discovery sweeps. Each runs on its own wall-clock interval; any
//! process instance may run any sweep, and correctness never depends on
//! which instance ran it.

pub mod deadline;
pub mod follow_up;
pub mod orphan;

use rand::Rng;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::state::AppState;

/// Summary of one sweep pass.
#[derive(Debug, Serialize, ToSchema)]
pub struct SweepOutcome {
    /// Candidates the bounded query returned.
    pub scanned: usize,
    /// Candidates acted on (dispatched, proposed, recovered).
    pub acted: usize,
    /// Candidates deliberately left alone.
    pub skipped: usize,
    /// Candidates whose handling errored. Failures are isolated per case;
    /// one bad case never aborts the batch.
    pub failed: usize,
}

impl SweepOutcome {
    pub fn scanned(scanned: usize) -> Self {
        Self {
            scanned,
            acted: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    FollowUp,
    Deadline,
    Orphan,
    StuckDecision,
    StaleQueued,
    StuckLocks,
    StaleRuns,
}

impl SweepKind {
    pub const ALL: [SweepKind; 7] = [
        Self::FollowUp,
        Self::Deadline,
        Self::Orphan,
        Self::StuckDecision,
        Self::StaleQueued,
        Self::StuckLocks,
        Self::StaleRuns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FollowUp => "follow_up",
            Self::Deadline => "deadline",
            Self::Orphan => "orphan",
            Self::StuckDecision => "stuck_decision",
            Self::StaleQueued => "stale_queued",
            Self::StuckLocks => "stuck_locks",
            Self::StaleRuns => "stale_runs",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    fn period(&self, state: &AppState) -> std::time::Duration {
        match self {
            Self::FollowUp => state.config.follow_up_sweep_period,
            Self::Deadline => state.config.deadline_sweep_period,
            Self::Orphan => state.config.orphan_sweep_period,
            Self::StuckDecision => state.config.stuck_decision_sweep_period,
            Self::StaleQueued => state.config.stale_queued_sweep_period,
            Self::StuckLocks => state.config.stuck_locks_sweep_period,
            Self::StaleRuns => state.config.stale_runs_sweep_period,
        }
    }
}

/// Run a single pass of one sweep. Also the entry point for the ops API.
pub async fn run_once(state: &AppState, kind: SweepKind) -> Result<SweepOutcome, AppError> {
    match kind {
        SweepKind::FollowUp => follow_up::run(state).await,
        SweepKind::Deadline => deadline::run(state).await,
        SweepKind::Orphan => orphan::run(state).await,
        SweepKind::StuckDecision => crate::proposals::check_stuck_decisions(state).await,
        SweepKind::StaleQueued => crate::dispatch::recover_stale_queued_runs(state).await,
        SweepKind::StuckLocks => crate::reaper::reap_stuck_locks(state).await,
        SweepKind::StaleRuns => crate::reaper::reap_stale_runs(state).await,
    }
}

/// Spawn every sweep loop. Called once from main; loops run for the life of
/// the process.
pub fn spawn_all(state: &AppState) {
    for kind in SweepKind::ALL {
        spawn_loop(state.clone(), kind);
    }
}

fn spawn_loop(state: AppState, kind: SweepKind) {
    tokio::spawn(async move {
        let period = kind.period(&state);

        // Stagger startup so several instances don't align their passes.
        let jitter_secs = rand::thread_rng().gen_range(0..period.as_secs().max(1).min(60));
        tokio::time::sleep(std::time::Duration::from_secs(jitter_secs)).await;

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match run_once(&state, kind).await {
                Ok(outcome) => {
                    tracing::info!(
                        sweep = kind.as_str(),
                        scanned = outcome.scanned,
                        acted = outcome.acted,
                        skipped = outcome.skipped,
                        failed = outcome.failed,
                        "sweep pass complete"
                    );
                }
                Err(e) => {
                    tracing::error!(sweep = kind.as_str(), error = ?e, "sweep pass failed");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::SweepKind;

    #[test]
    fn sweep_kinds_round_trip_through_names() {
        for kind in SweepKind::ALL {
            assert_eq!(SweepKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SweepKind::parse("coffee"), None);
    }
}
