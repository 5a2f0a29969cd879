use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CoreError;

/// Status of a case's follow-up recurrence.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStatus {
    Scheduled,
    Processing,
    Paused,
    Cancelled,
    MaxReached,
    Failed,
}

impl FollowUpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::MaxReached => "max_reached",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "scheduled" => Ok(Self::Scheduled),
            "processing" => Ok(Self::Processing),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            "max_reached" => Ok(Self::MaxReached),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::UnknownStatus {
                entity: "follow_up_schedule",
                value: other.to_string(),
            }),
        }
    }
}

/// Per-case follow-up recurrence state. One row per case, updated after
/// every cycle.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FollowUpSchedule {
    pub case_id: i64,
    pub next_due_at: Option<DateTime<Utc>>,
    pub follow_ups_sent: i32,
    pub max_follow_ups: i32,
    pub status: FollowUpStatus,
    pub auto_send: bool,
    pub error_count: i32,
    pub last_error: Option<String>,
    /// Idempotency key for the cycle currently being processed. A sweep pass
    /// that computes the same key observes the cycle already ran and skips.
    pub scheduled_key: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::FollowUpStatus;

    #[test]
    fn status_round_trips() {
        for status in [
            FollowUpStatus::Scheduled,
            FollowUpStatus::Processing,
            FollowUpStatus::Paused,
            FollowUpStatus::Cancelled,
            FollowUpStatus::MaxReached,
            FollowUpStatus::Failed,
        ] {
            assert_eq!(FollowUpStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(FollowUpStatus::parse("done").is_err());
    }
}
