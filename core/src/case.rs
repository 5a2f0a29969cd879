use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CoreError;

/// Lifecycle status of a correspondence case.
///
/// A case is long-lived and spans many agent runs. Status transitions are
/// driven by dispatch outcomes, approval decisions, and the recovery sweeps.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Draft,
    Ready,
    Sent,
    AwaitingResponse,
    NeedsHumanReview,
    NeedsPhoneCall,
    NeedsFeeDecision,
    NeedsRebuttal,
    SubmissionInProgress,
    Completed,
    Failed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::Sent => "sent",
            Self::AwaitingResponse => "awaiting_response",
            Self::NeedsHumanReview => "needs_human_review",
            Self::NeedsPhoneCall => "needs_phone_call",
            Self::NeedsFeeDecision => "needs_fee_decision",
            Self::NeedsRebuttal => "needs_rebuttal",
            Self::SubmissionInProgress => "submission_in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "draft" => Ok(Self::Draft),
            "ready" => Ok(Self::Ready),
            "sent" => Ok(Self::Sent),
            "awaiting_response" => Ok(Self::AwaitingResponse),
            "needs_human_review" => Ok(Self::NeedsHumanReview),
            "needs_phone_call" => Ok(Self::NeedsPhoneCall),
            "needs_fee_decision" => Ok(Self::NeedsFeeDecision),
            "needs_rebuttal" => Ok(Self::NeedsRebuttal),
            "submission_in_progress" => Ok(Self::SubmissionInProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::UnknownStatus {
                entity: "case",
                value: other.to_string(),
            }),
        }
    }

    /// Statuses from which a new agent run may be dispatched.
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self,
            Self::Ready
                | Self::Sent
                | Self::AwaitingResponse
                | Self::NeedsFeeDecision
                | Self::NeedsRebuttal
        )
    }

    /// Statuses that mean the work the dispatch would start is already done
    /// or already underway somewhere else.
    pub fn is_already_satisfied(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::SubmissionInProgress)
    }

    /// Statuses where a human owns the next step. These are the statuses the
    /// orphan sweep watches for silent stalls.
    pub fn needs_human_attention(&self) -> bool {
        matches!(
            self,
            Self::NeedsHumanReview
                | Self::NeedsPhoneCall
                | Self::NeedsFeeDecision
                | Self::NeedsRebuttal
        )
    }
}

/// A correspondence case as the orchestration core sees it. Business columns
/// beyond coordination state live with the intake service.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Case {
    pub id: i64,
    pub case_name: String,
    pub status: CaseStatus,
    /// Deadline by which the counterparty was expected to respond.
    pub response_deadline_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    /// External submission-channel URL, when the case went out via a portal.
    pub portal_url: Option<String>,
    /// Free-text note recorded when a portal submission is cancelled or advanced.
    pub last_portal_status: Option<String>,
    pub autopilot_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::CaseStatus;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            CaseStatus::Draft,
            CaseStatus::Ready,
            CaseStatus::Sent,
            CaseStatus::AwaitingResponse,
            CaseStatus::NeedsHumanReview,
            CaseStatus::NeedsPhoneCall,
            CaseStatus::NeedsFeeDecision,
            CaseStatus::NeedsRebuttal,
            CaseStatus::SubmissionInProgress,
            CaseStatus::Completed,
            CaseStatus::Failed,
        ] {
            assert_eq!(CaseStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert!(CaseStatus::parse("paused").is_err());
    }

    #[test]
    fn dispatchable_and_satisfied_sets_do_not_overlap() {
        for status in [
            CaseStatus::Completed,
            CaseStatus::Failed,
            CaseStatus::SubmissionInProgress,
        ] {
            assert!(status.is_already_satisfied());
            assert!(!status.is_dispatchable());
        }
        assert!(CaseStatus::AwaitingResponse.is_dispatchable());
        assert!(!CaseStatus::Draft.is_dispatchable());
    }

    #[test]
    fn human_attention_statuses() {
        assert!(CaseStatus::NeedsPhoneCall.needs_human_attention());
        assert!(!CaseStatus::AwaitingResponse.needs_human_attention());
    }
}
