use sqlx::PgPool;
use uuid::Uuid;

/// Which recovery sweep took the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperKind {
    StuckLock,
    StaleRun,
    StaleQueued,
    StuckDecision,
}

impl ReaperKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StuckLock => "stuck_lock",
            Self::StaleRun => "stale_run",
            Self::StaleQueued => "stale_queued",
            Self::StuckDecision => "stuck_decision",
        }
    }
}

/// Append one recovery action to the reaper audit log. The log is write-once:
/// nothing in the core ever updates or deletes rows. Failure to append is
/// swallowed with an error log — recovery itself must proceed.
pub async fn append_reaper_log(
    pool: &PgPool,
    kind: ReaperKind,
    target_kind: &str,
    target_id: &str,
    case_id: i64,
    action: &str,
    details: serde_json::Value,
) {
    let result = sqlx::query(
        "INSERT INTO reaper_audit_log (id, reaper_kind, target_kind, target_id, case_id, \
         action, details) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Uuid::now_v7())
    .bind(kind.as_str())
    .bind(target_kind)
    .bind(target_id)
    .bind(case_id)
    .bind(action)
    .bind(details)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!(error = %e, reaper = kind.as_str(), target_id, "reaper audit append failed");
    }
}
