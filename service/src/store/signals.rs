//! Read models written by the external collaborators. The core consumes
//! their structured outputs and never calls the services themselves.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use caseflow_core::intent::{AssessedIntent, MessageIntent};

use crate::error::AppError;

#[derive(Debug, sqlx::FromRow)]
struct IntentRow {
    message_id: i64,
    intent: String,
    confidence: f64,
    message_received_at: DateTime<Utc>,
}

/// The classification stored for a case's latest inbound message.
#[derive(Debug, Clone, Copy)]
pub struct LatestIntent {
    pub message_id: i64,
    /// None when the stored label is one the core does not recognize.
    pub assessed: Option<AssessedIntent>,
    pub message_received_at: DateTime<Utc>,
}

pub async fn latest_intent_for_case(
    pool: &PgPool,
    case_id: i64,
) -> Result<Option<LatestIntent>, AppError> {
    let row = sqlx::query_as::<_, IntentRow>(
        "SELECT message_id, intent, confidence, message_received_at \
         FROM message_intents \
         WHERE case_id = $1 \
         ORDER BY message_received_at DESC \
         LIMIT 1",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| LatestIntent {
        message_id: row.message_id,
        assessed: MessageIntent::parse(&row.intent).map(|intent| AssessedIntent {
            intent,
            confidence: row.confidence,
        }),
        message_received_at: row.message_received_at,
    }))
}

/// A contact candidate surfaced by the research collaborator.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContactCandidate {
    pub channel: String,
    pub value: String,
    pub confidence: f64,
}

pub async fn best_contact_candidate(
    pool: &PgPool,
    case_id: i64,
) -> Result<Option<ContactCandidate>, AppError> {
    let row = sqlx::query_as::<_, ContactCandidate>(
        "SELECT channel, value, confidence \
         FROM contact_candidates \
         WHERE case_id = $1 \
         ORDER BY confidence DESC, created_at DESC \
         LIMIT 1",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
