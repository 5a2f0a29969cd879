use chrono::{DateTime, Utc};
use sqlx::PgPool;

use caseflow_core::case::{Case, CaseStatus};

use super::ACTIVE_RUN_STATUS_SQL;
use crate::error::AppError;

#[derive(Debug, sqlx::FromRow)]
pub struct CaseRow {
    pub id: i64,
    pub case_name: String,
    pub status: String,
    pub response_deadline_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub portal_url: Option<String>,
    pub last_portal_status: Option<String>,
    pub autopilot_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const CASE_COLUMNS: &str = "id, case_name, status, response_deadline_at, sent_at, portal_url, \
     last_portal_status, autopilot_enabled, created_at, updated_at";

impl CaseRow {
    pub fn into_domain(self) -> Result<Case, AppError> {
        Ok(Case {
            id: self.id,
            case_name: self.case_name,
            status: CaseStatus::parse(&self.status)?,
            response_deadline_at: self.response_deadline_at,
            sent_at: self.sent_at,
            portal_url: self.portal_url,
            last_portal_status: self.last_portal_status,
            autopilot_enabled: self.autopilot_enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub async fn fetch(pool: &PgPool, case_id: i64) -> Result<Option<Case>, AppError> {
    let row = sqlx::query_as::<_, CaseRow>(&format!(
        "SELECT {CASE_COLUMNS} FROM cases WHERE id = $1"
    ))
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    row.map(CaseRow::into_domain).transpose()
}

pub async fn set_status(pool: &PgPool, case_id: i64, status: CaseStatus) -> Result<(), AppError> {
    sqlx::query("UPDATE cases SET status = $2, updated_at = now() WHERE id = $1")
        .bind(case_id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Auto-complete a case, recording why in the portal-status note.
pub async fn complete(pool: &PgPool, case_id: i64, note: &str) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE cases \
         SET status = 'completed', last_portal_status = $2, updated_at = now() \
         WHERE id = $1",
    )
    .bind(case_id)
    .bind(note)
    .execute(pool)
    .await?;
    Ok(())
}

/// Cases past their response deadline, with no active run and no inbound
/// activity inside the recent window. The deadline sweep's candidate set.
pub async fn select_past_deadline(
    pool: &PgPool,
    recent_activity_cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Case>, AppError> {
    let rows = sqlx::query_as::<_, CaseRow>(&format!(
        "SELECT {CASE_COLUMNS} FROM cases c \
         WHERE c.status IN ('sent', 'awaiting_response') \
           AND c.response_deadline_at IS NOT NULL \
           AND c.response_deadline_at < now() \
           AND NOT EXISTS ( \
               SELECT 1 FROM agent_runs r \
               WHERE r.case_id = c.id AND r.status IN {ACTIVE_RUN_STATUS_SQL}) \
           AND NOT EXISTS ( \
               SELECT 1 FROM message_intents m \
               WHERE m.case_id = c.id AND m.message_received_at > $1) \
         ORDER BY c.response_deadline_at \
         LIMIT $2"
    ))
    .bind(recent_activity_cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CaseRow::into_domain).collect()
}

/// Cases parked in a human-attention status past the threshold with no open
/// proposal and no active run — silently stalled.
pub async fn select_orphaned(
    pool: &PgPool,
    parked_cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Case>, AppError> {
    let rows = sqlx::query_as::<_, CaseRow>(&format!(
        "SELECT {CASE_COLUMNS} FROM cases c \
         WHERE c.status IN ('needs_human_review', 'needs_phone_call', \
                            'needs_fee_decision', 'needs_rebuttal') \
           AND c.updated_at < $1 \
           AND NOT EXISTS ( \
               SELECT 1 FROM proposals p \
               WHERE p.case_id = c.id \
                 AND p.status IN ('draft', 'pending_approval', 'decision_received', \
                                  'approved', 'pending_external_submission')) \
           AND NOT EXISTS ( \
               SELECT 1 FROM agent_runs r \
               WHERE r.case_id = c.id AND r.status IN {ACTIVE_RUN_STATUS_SQL}) \
         ORDER BY c.updated_at \
         LIMIT $2"
    ))
    .bind(parked_cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CaseRow::into_domain).collect()
}
