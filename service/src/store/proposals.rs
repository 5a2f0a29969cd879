use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use caseflow_core::proposal::{ActionKind, Proposal, ProposalStatus};

use crate::error::AppError;

#[derive(Debug, sqlx::FromRow)]
pub struct ProposalRow {
    pub id: Uuid,
    pub case_id: i64,
    pub action_kind: String,
    pub status: String,
    pub dedup_key: String,
    pub summary: String,
    pub payload: serde_json::Value,
    pub decision: serde_json::Value,
    pub execution_retries: i32,
    pub dismissed_reason: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PROPOSAL_COLUMNS: &str = "id, case_id, action_kind, status, dedup_key, summary, payload, \
     decision, execution_retries, dismissed_reason, decided_at, created_at, updated_at";

/// Live statuses for dedup purposes. Must stay in sync with the partial
/// unique index on `proposals.dedup_key`; dismissed and blocked rows are
/// history and never conflict.
const LIVE_STATUS_SQL: &str =
    "('draft', 'pending_approval', 'decision_received', 'approved', 'pending_external_submission')";

impl ProposalRow {
    pub fn into_domain(self) -> Result<Proposal, AppError> {
        Ok(Proposal {
            id: self.id,
            case_id: self.case_id,
            action_kind: ActionKind::parse(&self.action_kind)?,
            status: ProposalStatus::parse(&self.status)?,
            dedup_key: self.dedup_key,
            summary: self.summary,
            payload: self.payload,
            decision: self.decision,
            execution_retries: self.execution_retries,
            dismissed_reason: self.dismissed_reason,
            decided_at: self.decided_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct NewProposal {
    pub case_id: i64,
    pub action_kind: ActionKind,
    pub dedup_key: String,
    pub summary: String,
    pub payload: serde_json::Value,
}

/// Insert-or-update keyed by the dedup key: the same logical action updates
/// in place rather than piling up duplicates. An existing live proposal
/// keeps its status and decision; only content refreshes.
pub async fn upsert(pool: &PgPool, proposal: &NewProposal) -> Result<Proposal, AppError> {
    let row = sqlx::query_as::<_, ProposalRow>(&format!(
        "INSERT INTO proposals (id, case_id, action_kind, status, dedup_key, summary, payload) \
         VALUES ($1, $2, $3, 'pending_approval', $4, $5, $6) \
         ON CONFLICT (dedup_key) WHERE status IN {LIVE_STATUS_SQL} \
         DO UPDATE SET summary = EXCLUDED.summary, \
                       payload = EXCLUDED.payload, \
                       updated_at = now() \
         RETURNING {PROPOSAL_COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(proposal.case_id)
    .bind(proposal.action_kind.as_str())
    .bind(&proposal.dedup_key)
    .bind(&proposal.summary)
    .bind(&proposal.payload)
    .fetch_one(pool)
    .await?;

    row.into_domain()
}

pub async fn fetch(pool: &PgPool, proposal_id: Uuid) -> Result<Option<Proposal>, AppError> {
    let row = sqlx::query_as::<_, ProposalRow>(&format!(
        "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = $1"
    ))
    .bind(proposal_id)
    .fetch_optional(pool)
    .await?;

    row.map(ProposalRow::into_domain).transpose()
}

pub async fn list_for_case(pool: &PgPool, case_id: i64) -> Result<Vec<Proposal>, AppError> {
    let rows = sqlx::query_as::<_, ProposalRow>(&format!(
        "SELECT {PROPOSAL_COLUMNS} FROM proposals \
         WHERE case_id = $1 \
         ORDER BY created_at DESC"
    ))
    .bind(case_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ProposalRow::into_domain).collect()
}

/// Dismissal count feeding the per-case circuit breaker.
pub async fn count_dismissed(pool: &PgPool, case_id: i64) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM proposals WHERE case_id = $1 AND status = 'dismissed'",
    )
    .bind(case_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Approved proposals whose post-approval execution never progressed: still
/// in `decision_received`, untouched past the stuck window.
pub async fn select_stuck_decisions(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Proposal>, AppError> {
    let rows = sqlx::query_as::<_, ProposalRow>(&format!(
        "SELECT {PROPOSAL_COLUMNS} FROM proposals \
         WHERE status = 'decision_received' \
           AND updated_at < $1 \
         ORDER BY updated_at \
         LIMIT $2"
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ProposalRow::into_domain).collect()
}

/// Bump the bounded retry counter. Returns the new count, or None if the
/// proposal left `decision_received` in the meantime.
pub async fn increment_execution_retries(
    pool: &PgPool,
    proposal_id: Uuid,
) -> Result<Option<i32>, AppError> {
    let count = sqlx::query_scalar::<_, i32>(
        "UPDATE proposals \
         SET execution_retries = execution_retries + 1, updated_at = now() \
         WHERE id = $1 AND status = 'decision_received' \
         RETURNING execution_retries",
    )
    .bind(proposal_id)
    .fetch_optional(pool)
    .await?;
    Ok(count)
}

/// Terminal dismissal. Guarded on the current status so a settled proposal
/// is never re-dismissed.
pub async fn dismiss(pool: &PgPool, proposal_id: Uuid, reason: &str) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE proposals \
         SET status = 'dismissed', dismissed_reason = $2, updated_at = now() \
         WHERE id = $1 AND status IN ('draft', 'pending_approval', 'decision_received')",
    )
    .bind(proposal_id)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Record a human decision on a pending proposal. Approval parks the row in
/// `decision_received`; the post-approval pipeline picks it up from there.
pub async fn record_decision(
    pool: &PgPool,
    proposal_id: Uuid,
    approve: bool,
    decision: serde_json::Value,
) -> Result<bool, AppError> {
    let result = if approve {
        sqlx::query(
            "UPDATE proposals \
             SET status = 'decision_received', decision = $2, decided_at = now(), \
                 updated_at = now() \
             WHERE id = $1 AND status = 'pending_approval'",
        )
        .bind(proposal_id)
        .bind(decision)
        .execute(pool)
        .await?
    } else {
        sqlx::query(
            "UPDATE proposals \
             SET status = 'dismissed', dismissed_reason = 'dismissed_by_reviewer', \
                 decision = $2, decided_at = now(), updated_at = now() \
             WHERE id = $1 AND status = 'pending_approval'",
        )
        .bind(proposal_id)
        .bind(decision)
        .execute(pool)
        .await?
    };
    Ok(result.rows_affected() > 0)
}
