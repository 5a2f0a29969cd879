use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::CoreError;

/// Statuses that count against the single-active-run-per-case invariant.
/// Must stay in sync with the partial unique index predicate on `agent_runs`.
pub const ACTIVE_RUN_STATUSES: [RunStatus; 6] = [
    RunStatus::Created,
    RunStatus::Queued,
    RunStatus::Running,
    RunStatus::Paused,
    RunStatus::Waiting,
    RunStatus::Gated,
];

/// Status of one execution attempt of the decision pipeline.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Queued,
    Running,
    Paused,
    Waiting,
    Gated,
    Completed,
    Failed,
    FailedStale,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Waiting => "waiting",
            Self::Gated => "gated",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::FailedStale => "failed_stale",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "waiting" => Ok(Self::Waiting),
            "gated" => Ok(Self::Gated),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "failed_stale" => Ok(Self::FailedStale),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::UnknownStatus {
                entity: "agent_run",
                value: other.to_string(),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        ACTIVE_RUN_STATUSES.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::FailedStale | Self::Cancelled
        )
    }
}

/// What caused a run to be dispatched.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    InitialRequest,
    FollowupTrigger,
    InboundMessage,
    ResumeRetry,
    ManualReview,
    Reset,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialRequest => "initial_request",
            Self::FollowupTrigger => "followup_trigger",
            Self::InboundMessage => "inbound_message",
            Self::ResumeRetry => "resume_retry",
            Self::ManualReview => "manual_review",
            Self::Reset => "reset",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "initial_request" => Ok(Self::InitialRequest),
            "followup_trigger" => Ok(Self::FollowupTrigger),
            "inbound_message" => Ok(Self::InboundMessage),
            "resume_retry" => Ok(Self::ResumeRetry),
            "manual_review" => Ok(Self::ManualReview),
            "reset" => Ok(Self::Reset),
            other => Err(CoreError::UnknownStatus {
                entity: "trigger_kind",
                value: other.to_string(),
            }),
        }
    }

    /// Trigger kinds that intentionally supersede whatever run is already
    /// active for the same (case, message) identity, so identity-based dedup
    /// must not cancel them.
    pub fn supersedes_duplicates(&self) -> bool {
        matches!(self, Self::Reset | Self::ResumeRetry)
    }
}

/// Well-known keys inside `agent_runs.metadata`. The map is open-ended so the
/// execution platform can attach its own context, but the core only reads and
/// writes these.
pub mod metadata {
    /// Correlation id returned by the execution platform at submit time.
    pub const TASK_RUN_ID: &str = "task_run_id";
    /// How many times this logical unit of work has been submitted.
    pub const DISPATCH_ATTEMPTS: &str = "dispatch_attempts";
    /// The idempotency key used for the most recent submission.
    pub const IDEMPOTENCY_KEY: &str = "idempotency_key";
    /// Run id of the replacement created by stale-queued recovery.
    pub const REPLACED_BY: &str = "replaced_by";
    /// Run id of the surviving duplicate that made this run redundant.
    pub const SUPERSEDED_BY: &str = "superseded_by";
    /// Last status bucket observed from the platform during verification.
    pub const LAST_PLATFORM_STATUS: &str = "last_platform_status";
}

/// One execution attempt of the decision pipeline for a case.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AgentRun {
    pub id: Uuid,
    pub case_id: i64,
    pub trigger_kind: TriggerKind,
    /// Inbound message that triggered this run, when there was one.
    pub message_id: Option<i64>,
    pub status: RunStatus,
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

impl AgentRun {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn dispatch_attempts(&self) -> i64 {
        self.metadata
            .get(metadata::DISPATCH_ATTEMPTS)
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::{AgentRun, RunStatus, TriggerKind, metadata};

    fn run_with_metadata(value: serde_json::Value) -> AgentRun {
        AgentRun {
            id: Uuid::now_v7(),
            case_id: 42,
            trigger_kind: TriggerKind::InboundMessage,
            message_id: Some(7),
            status: RunStatus::Queued,
            autopilot_enabled: true,
            lock_acquired: false,
            lock_key: None,
            lock_expires_at: None,
            heartbeat_at: None,
            started_at: None,
            ended_at: None,
            error: None,
            recovery_attempted: false,
            recovered_by_reaper: false,
            metadata: value,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn active_statuses_match_is_active() {
        assert!(RunStatus::Gated.is_active());
        assert!(RunStatus::Paused.is_active());
        assert!(!RunStatus::Cancelled.is_active());
        assert!(!RunStatus::FailedStale.is_active());
    }

    #[test]
    fn terminal_and_active_are_disjoint() {
        for status in [
            RunStatus::Created,
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Waiting,
            RunStatus::Gated,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::FailedStale,
            RunStatus::Cancelled,
        ] {
            assert_ne!(status.is_active(), status.is_terminal());
            assert_eq!(RunStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn reset_and_resume_supersede_duplicates() {
        assert!(TriggerKind::Reset.supersedes_duplicates());
        assert!(TriggerKind::ResumeRetry.supersedes_duplicates());
        assert!(!TriggerKind::InboundMessage.supersedes_duplicates());
        assert!(!TriggerKind::FollowupTrigger.supersedes_duplicates());
    }

    #[test]
    fn metadata_accessors_tolerate_missing_keys() {
        let run = run_with_metadata(json!({}));
        assert_eq!(run.dispatch_attempts(), 0);
        assert_eq!(run.metadata_str(metadata::TASK_RUN_ID), None);

        let run = run_with_metadata(json!({
            (metadata::TASK_RUN_ID): "exec-123",
            (metadata::DISPATCH_ATTEMPTS): 2,
        }));
        assert_eq!(run.dispatch_attempts(), 2);
        assert_eq!(run.metadata_str(metadata::TASK_RUN_ID), Some("exec-123"));
    }
}
