use chrono::{DateTime, Utc};
use sqlx::PgPool;

use caseflow_core::follow_up::{FollowUpSchedule, FollowUpStatus};

use super::ACTIVE_RUN_STATUS_SQL;
use crate::error::AppError;

#[derive(Debug, sqlx::FromRow)]
pub struct ScheduleRow {
    pub case_id: i64,
    pub next_due_at: Option<DateTime<Utc>>,
    pub follow_ups_sent: i32,
    pub max_follow_ups: i32,
    pub status: String,
    pub auto_send: bool,
    pub error_count: i32,
    pub last_error: Option<String>,
    pub scheduled_key: Option<String>,
    pub updated_at: DateTime<Utc>,
}

const SCHEDULE_COLUMNS: &str = "case_id, next_due_at, follow_ups_sent, max_follow_ups, status, \
     auto_send, error_count, last_error, scheduled_key, updated_at";

impl ScheduleRow {
    pub fn into_domain(self) -> Result<FollowUpSchedule, AppError> {
        Ok(FollowUpSchedule {
            case_id: self.case_id,
            next_due_at: self.next_due_at,
            follow_ups_sent: self.follow_ups_sent,
            max_follow_ups: self.max_follow_ups,
            status: FollowUpStatus::parse(&self.status)?,
            auto_send: self.auto_send,
            error_count: self.error_count,
            last_error: self.last_error,
            scheduled_key: self.scheduled_key,
            updated_at: self.updated_at,
        })
    }
}

/// Schedules due for another follow-up cycle, excluding cases that already
/// have an active run.
pub async fn select_due(pool: &PgPool, limit: i64) -> Result<Vec<FollowUpSchedule>, AppError> {
    let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM follow_up_schedule s \
         WHERE s.status = 'scheduled' \
           AND s.auto_send = true \
           AND s.next_due_at IS NOT NULL \
           AND s.next_due_at <= now() \
           AND s.follow_ups_sent < s.max_follow_ups \
           AND NOT EXISTS ( \
               SELECT 1 FROM agent_runs r \
               WHERE r.case_id = s.case_id AND r.status IN {ACTIVE_RUN_STATUS_SQL}) \
         ORDER BY s.next_due_at \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ScheduleRow::into_domain).collect()
}

/// Claim the current cycle under its scheduled key. Returns false when the
/// key is already recorded (cycle already ran) or another instance claimed
/// the row first.
pub async fn claim_cycle(pool: &PgPool, case_id: i64, key: &str) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE follow_up_schedule \
         SET status = 'processing', scheduled_key = $2, updated_at = now() \
         WHERE case_id = $1 \
           AND status = 'scheduled' \
           AND scheduled_key IS DISTINCT FROM $2",
    )
    .bind(case_id)
    .bind(key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// A cycle dispatched: bump the sent count, clear error state, schedule the
/// next due time — or park at max_reached.
pub async fn complete_cycle(
    pool: &PgPool,
    case_id: i64,
    next_due_at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE follow_up_schedule \
         SET follow_ups_sent = follow_ups_sent + 1, \
             status = CASE WHEN follow_ups_sent + 1 >= max_follow_ups \
                           THEN 'max_reached' ELSE 'scheduled' END, \
             next_due_at = $2, \
             error_count = 0, last_error = NULL, updated_at = now() \
         WHERE case_id = $1 AND status = 'processing'",
    )
    .bind(case_id)
    .bind(next_due_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// The claimed cycle did not dispatch (e.g. a reactive run won the case in
/// the meantime). Release the claim so a later pass can retry the cycle.
pub async fn release_cycle(pool: &PgPool, case_id: i64) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE follow_up_schedule \
         SET status = 'scheduled', scheduled_key = NULL, updated_at = now() \
         WHERE case_id = $1 AND status = 'processing'",
    )
    .bind(case_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a dispatch failure; past the error bound the schedule parks in
/// `failed` and stops being selected.
pub async fn record_failure(
    pool: &PgPool,
    case_id: i64,
    error: &str,
    max_errors: i32,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE follow_up_schedule \
         SET error_count = error_count + 1, \
             last_error = $2, \
             scheduled_key = NULL, \
             status = CASE WHEN error_count + 1 >= $3 THEN 'failed' ELSE 'scheduled' END, \
             updated_at = now() \
         WHERE case_id = $1",
    )
    .bind(case_id)
    .bind(error)
    .bind(max_errors)
    .execute(pool)
    .await?;
    Ok(())
}
