use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use caseflow_core::run::{AgentRun, RunStatus, TriggerKind, metadata};

use super::ACTIVE_RUN_STATUS_SQL;
use crate::error::AppError;

#[derive(Debug, sqlx::FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub case_id: i64,
    pub trigger_kind: String,
    pub message_id: Option<i64>,
    pub status: String,
    pub autopilot_enabled: bool,
    pub lock_acquired: bool,
    pub lock_key: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub recovery_attempted: bool,
    pub recovered_by_reaper: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

const RUN_COLUMNS: &str = "id, case_id, trigger_kind, message_id, status, autopilot_enabled, \
     lock_acquired, lock_key, lock_expires_at, heartbeat_at, started_at, ended_at, error, \
     recovery_attempted, recovered_by_reaper, metadata, created_at";

impl RunRow {
    pub fn into_domain(self) -> Result<AgentRun, AppError> {
        Ok(AgentRun {
            id: self.id,
            case_id: self.case_id,
            trigger_kind: TriggerKind::parse(&self.trigger_kind)?,
            message_id: self.message_id,
            status: RunStatus::parse(&self.status)?,
            autopilot_enabled: self.autopilot_enabled,
            lock_acquired: self.lock_acquired,
            lock_key: self.lock_key,
            lock_expires_at: self.lock_expires_at,
            heartbeat_at: self.heartbeat_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            error: self.error,
            recovery_attempted: self.recovery_attempted,
            recovered_by_reaper: self.recovered_by_reaper,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

pub struct NewRun {
    pub id: Uuid,
    pub case_id: i64,
    pub trigger_kind: TriggerKind,
    pub message_id: Option<i64>,
    pub autopilot_enabled: bool,
    pub metadata: serde_json::Value,
}

/// Insert a run in `queued`. Returns the raw sqlx error so the caller can
/// distinguish a lost race on the single-active-run index (SQLSTATE 23505)
/// from a genuine failure.
pub async fn insert_queued(pool: &PgPool, run: &NewRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO agent_runs (id, case_id, trigger_kind, message_id, status, \
         autopilot_enabled, metadata) \
         VALUES ($1, $2, $3, $4, 'queued', $5, $6)",
    )
    .bind(run.id)
    .bind(run.case_id)
    .bind(run.trigger_kind.as_str())
    .bind(run.message_id)
    .bind(run.autopilot_enabled)
    .bind(&run.metadata)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch(pool: &PgPool, run_id: Uuid) -> Result<Option<AgentRun>, AppError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM agent_runs WHERE id = $1"
    ))
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    row.map(RunRow::into_domain).transpose()
}

/// The at-most-one run counted by the exclusivity invariant.
pub async fn find_active_for_case(
    pool: &PgPool,
    case_id: i64,
) -> Result<Option<AgentRun>, AppError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM agent_runs \
         WHERE case_id = $1 AND status IN {ACTIVE_RUN_STATUS_SQL} \
         LIMIT 1"
    ))
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    row.map(RunRow::into_domain).transpose()
}

/// Another active run with the same (case, message, trigger-kind) identity.
/// Feeds identity-based dedup, which is distinct from idempotency-key dedup:
/// this one catches duplicates before they ever reach the platform.
pub async fn find_active_duplicate(
    pool: &PgPool,
    case_id: i64,
    trigger_kind: TriggerKind,
    message_id: Option<i64>,
    exclude_run: Uuid,
) -> Result<Option<AgentRun>, AppError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM agent_runs \
         WHERE case_id = $1 \
           AND trigger_kind = $2 \
           AND message_id IS NOT DISTINCT FROM $3 \
           AND id <> $4 \
           AND status IN {ACTIVE_RUN_STATUS_SQL} \
         LIMIT 1"
    ))
    .bind(case_id)
    .bind(trigger_kind.as_str())
    .bind(message_id)
    .bind(exclude_run)
    .fetch_optional(pool)
    .await?;

    row.map(RunRow::into_domain).transpose()
}

pub async fn list_for_case(
    pool: &PgPool,
    case_id: i64,
    limit: i64,
) -> Result<Vec<AgentRun>, AppError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM agent_runs \
         WHERE case_id = $1 \
         ORDER BY created_at DESC \
         LIMIT $2"
    ))
    .bind(case_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RunRow::into_domain).collect()
}

/// Shallow-merge a patch into the run's metadata map.
pub async fn merge_metadata(
    pool: &PgPool,
    run_id: Uuid,
    patch: serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query("UPDATE agent_runs SET metadata = metadata || $2 WHERE id = $1")
        .bind(run_id)
        .bind(patch)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, run_id: Uuid, error: &str) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE agent_runs \
         SET status = 'failed', error = $2, ended_at = now(), \
             lock_acquired = false, lock_key = NULL, lock_expires_at = NULL \
         WHERE id = $1",
    )
    .bind(run_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_completed(pool: &PgPool, run_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE agent_runs \
         SET status = 'completed', ended_at = now(), \
             lock_acquired = false, lock_key = NULL, lock_expires_at = NULL \
         WHERE id = $1",
    )
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Cancel a local duplicate, pointing at the run that survives. Local
/// bookkeeping only; nothing is cancelled remotely.
pub async fn mark_cancelled_superseded(
    pool: &PgPool,
    run_id: Uuid,
    survivor: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE agent_runs \
         SET status = 'cancelled', ended_at = now(), \
             metadata = metadata || $2 \
         WHERE id = $1",
    )
    .bind(run_id)
    .bind(json!({ (metadata::SUPERSEDED_BY): survivor.to_string() }))
    .execute(pool)
    .await?;
    Ok(())
}

/// Transition a run to `running` and implicitly acquire the case lock.
/// Guarded so only a dispatched run can start; returns false if the run was
/// not in a startable status (already recovered, cancelled, or racing).
pub async fn mark_running(
    pool: &PgPool,
    run_id: Uuid,
    lock_ttl: Duration,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE agent_runs \
         SET status = 'running', lock_acquired = true, \
             lock_key = 'run:' || id::text, \
             lock_expires_at = $2, started_at = now(), heartbeat_at = now() \
         WHERE id = $1 AND status IN ('created', 'queued')",
    )
    .bind(run_id)
    .bind(Utc::now() + lock_ttl)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Refresh liveness during long operations; extends the lock lease.
pub async fn update_heartbeat(
    pool: &PgPool,
    run_id: Uuid,
    lock_ttl: Duration,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE agent_runs \
         SET heartbeat_at = now(), lock_expires_at = $2 \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(run_id)
    .bind(Utc::now() + lock_ttl)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Runs stuck in `queued` past the age bound that have a correlation id to
/// check against the platform.
pub async fn select_stale_queued(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<AgentRun>, AppError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM agent_runs \
         WHERE status = 'queued' \
           AND created_at < $1 \
           AND metadata ? 'task_run_id' \
         ORDER BY created_at \
         LIMIT $2"
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RunRow::into_domain).collect()
}

/// Running runs whose lock lease has lapsed — no heartbeat within the TTL.
pub async fn select_expired_locks(pool: &PgPool, limit: i64) -> Result<Vec<AgentRun>, AppError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM agent_runs \
         WHERE status = 'running' \
           AND lock_acquired = true \
           AND lock_expires_at < now() \
           AND recovery_attempted = false \
         ORDER BY lock_expires_at \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RunRow::into_domain).collect()
}

/// Running runs past the broader staleness bound regardless of recorded lock
/// state. Catches workers that crashed before recording lock acquisition.
pub async fn select_stale_running(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<AgentRun>, AppError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM agent_runs \
         WHERE status = 'running' \
           AND COALESCE(heartbeat_at, started_at, created_at) < $1 \
           AND recovery_attempted = false \
         ORDER BY started_at \
         LIMIT $2"
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(RunRow::into_domain).collect()
}

/// Force-release the case lock and mark the run dead. Guarded on status so
/// two reaper instances can't both claim the recovery.
pub async fn recover_to_failed_stale(
    pool: &PgPool,
    run_id: Uuid,
    error: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE agent_runs \
         SET status = 'failed_stale', error = $2, ended_at = now(), \
             lock_acquired = false, lock_key = NULL, lock_expires_at = NULL, \
             recovery_attempted = true, recovered_by_reaper = true \
         WHERE id = $1 AND status = 'running' AND recovery_attempted = false",
    )
    .bind(run_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
