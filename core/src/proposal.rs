use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::CoreError;

/// Hard bound on post-approval execution retries. Once a proposal has been
/// re-dispatched this many times without progress it is dismissed and the
/// case escalates to a human.
pub const MAX_EXECUTION_RETRIES: i32 = 5;

/// Dismissed proposals at or past this count trip the per-case circuit
/// breaker: the deadline sweep stops reproposing and forces escalation.
pub const DISMISSED_CIRCUIT_THRESHOLD: i64 = 3;

/// Status of a candidate action awaiting approval or auto-execution.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    PendingApproval,
    DecisionReceived,
    Approved,
    Dismissed,
    Blocked,
    PendingExternalSubmission,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::DecisionReceived => "decision_received",
            Self::Approved => "approved",
            Self::Dismissed => "dismissed",
            Self::Blocked => "blocked",
            Self::PendingExternalSubmission => "pending_external_submission",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "draft" => Ok(Self::Draft),
            "pending_approval" => Ok(Self::PendingApproval),
            "decision_received" => Ok(Self::DecisionReceived),
            "approved" => Ok(Self::Approved),
            "dismissed" => Ok(Self::Dismissed),
            "blocked" => Ok(Self::Blocked),
            "pending_external_submission" => Ok(Self::PendingExternalSubmission),
            other => Err(CoreError::UnknownStatus {
                entity: "proposal",
                value: other.to_string(),
            }),
        }
    }

    /// A proposal still awaiting a decision or execution. Cases with an open
    /// proposal are skipped by the orphan sweep.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Draft
                | Self::PendingApproval
                | Self::DecisionReceived
                | Self::Approved
                | Self::PendingExternalSubmission
        )
    }
}

/// The action a proposal suggests taking on its case.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendFollowup,
    FeeDecision,
    Clarification,
    Rebuttal,
    Resubmission,
    ContactCorrection,
    PhoneEscalation,
    HumanReview,
    CompleteCase,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendFollowup => "send_followup",
            Self::FeeDecision => "fee_decision",
            Self::Clarification => "clarification",
            Self::Rebuttal => "rebuttal",
            Self::Resubmission => "resubmission",
            Self::ContactCorrection => "contact_correction",
            Self::PhoneEscalation => "phone_escalation",
            Self::HumanReview => "human_review",
            Self::CompleteCase => "complete_case",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "send_followup" => Ok(Self::SendFollowup),
            "fee_decision" => Ok(Self::FeeDecision),
            "clarification" => Ok(Self::Clarification),
            "rebuttal" => Ok(Self::Rebuttal),
            "resubmission" => Ok(Self::Resubmission),
            "contact_correction" => Ok(Self::ContactCorrection),
            "phone_escalation" => Ok(Self::PhoneEscalation),
            "human_review" => Ok(Self::HumanReview),
            "complete_case" => Ok(Self::CompleteCase),
            other => Err(CoreError::UnknownStatus {
                entity: "action_kind",
                value: other.to_string(),
            }),
        }
    }

    /// Actions that hand the case to a human rather than another automated run.
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::PhoneEscalation | Self::HumanReview)
    }
}

/// A candidate action pending approval or auto-execution, deduplicated by a
/// stable key so the same logical action updates in place.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Proposal {
    pub id: Uuid,
    pub case_id: i64,
    pub action_kind: ActionKind,
    pub status: ProposalStatus,
    pub dedup_key: String,
    pub summary: String,
    /// Draft content and routing context produced by the collaborators.
    pub payload: serde_json::Value,
    /// The human decision as received, verbatim.
    pub decision: serde_json::Value,
    /// Post-approval execution retries. Bounded by [`MAX_EXECUTION_RETRIES`].
    pub execution_retries: i32,
    pub dismissed_reason: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{ActionKind, ProposalStatus};

    #[test]
    fn status_round_trips() {
        for status in [
            ProposalStatus::Draft,
            ProposalStatus::PendingApproval,
            ProposalStatus::DecisionReceived,
            ProposalStatus::Approved,
            ProposalStatus::Dismissed,
            ProposalStatus::Blocked,
            ProposalStatus::PendingExternalSubmission,
        ] {
            assert_eq!(ProposalStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn dismissed_and_blocked_are_not_open() {
        assert!(!ProposalStatus::Dismissed.is_open());
        assert!(!ProposalStatus::Blocked.is_open());
        assert!(ProposalStatus::DecisionReceived.is_open());
    }

    #[test]
    fn action_kind_round_trips() {
        for kind in [
            ActionKind::SendFollowup,
            ActionKind::FeeDecision,
            ActionKind::Clarification,
            ActionKind::Rebuttal,
            ActionKind::Resubmission,
            ActionKind::ContactCorrection,
            ActionKind::PhoneEscalation,
            ActionKind::HumanReview,
            ActionKind::CompleteCase,
        ] {
            assert_eq!(ActionKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn escalation_actions() {
        assert!(ActionKind::PhoneEscalation.is_escalation());
        assert!(ActionKind::HumanReview.is_escalation());
        assert!(!ActionKind::Rebuttal.is_escalation());
    }
}
