//! Deadline/escalation sweep: cases past their response deadline with no
//! recent inbound activity get routed to a next action — by assessed intent
//! when one exists, by contact research otherwise, and straight to
//! escalation once the case's circuit breaker has tripped.

use chrono::Utc;
use serde_json::json;

use caseflow_core::case::Case;
use caseflow_core::intent::{AssessedIntent, MessageIntent};
use caseflow_core::proposal::ActionKind;

use super::SweepOutcome;
use crate::dispatch;
use crate::error::AppError;
use crate::notify::{Severity, log_activity};
use crate::state::AppState;
use crate::store::cases;
use crate::store::signals::{self, ContactCandidate};

/// What the sweep decided for one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineAction {
    Propose(ActionKind),
    /// The counterparty's response was assessed as fulfilling the request.
    Complete,
}

/// Map an assessed intent to its next action.
pub fn route_intent(intent: MessageIntent) -> DeadlineAction {
    match intent {
        MessageIntent::FeeRequest => DeadlineAction::Propose(ActionKind::FeeDecision),
        MessageIntent::ClarificationNeeded => DeadlineAction::Propose(ActionKind::Clarification),
        MessageIntent::Denial => DeadlineAction::Propose(ActionKind::Rebuttal),
        MessageIntent::WrongRecipient => DeadlineAction::Propose(ActionKind::Resubmission),
        MessageIntent::Fulfilled => DeadlineAction::Complete,
        MessageIntent::PhoneRequired => DeadlineAction::Propose(ActionKind::PhoneEscalation),
    }
}

/// Full routing decision for one overdue case. The circuit breaker wins over
/// everything: past the dismissal threshold no amount of classification gets
/// another automatic repropose.
pub fn decide(
    circuit_tripped: bool,
    intent: Option<AssessedIntent>,
    min_confidence: f64,
    contact: Option<&ContactCandidate>,
) -> DeadlineAction {
    if circuit_tripped {
        return DeadlineAction::Propose(ActionKind::PhoneEscalation);
    }

    if let Some(assessed) = intent {
        if assessed.confidence >= min_confidence {
            return route_intent(assessed.intent);
        }
    }

    // No usable intent: fall back to contact research.
    match contact {
        Some(candidate) if candidate.confidence >= min_confidence => {
            DeadlineAction::Propose(ActionKind::ContactCorrection)
        }
        _ => DeadlineAction::Propose(ActionKind::PhoneEscalation),
    }
}

pub async fn run(state: &AppState) -> Result<SweepOutcome, AppError> {
    let recent_cutoff = Utc::now() - state.config.recent_activity_window;
    let overdue =
        cases::select_past_deadline(&state.db, recent_cutoff, state.config.sweep_batch_limit)
            .await?;

    let mut outcome = SweepOutcome::scanned(overdue.len());
    for case in overdue {
        match process_one(state, &case).await {
            Ok(true) => outcome.acted += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                outcome.failed += 1;
                tracing::error!(error = ?e, case_id = case.id, "deadline handling failed");
            }
        }
    }
    Ok(outcome)
}

async fn process_one(state: &AppState, case: &Case) -> Result<bool, AppError> {
    let tripped = dispatch::circuit_breaker_tripped(state, case.id).await?;
    let latest = signals::latest_intent_for_case(&state.db, case.id).await?;
    let assessed = latest.as_ref().and_then(|l| l.assessed);

    // Contact research only matters on the no-intent path.
    let contact = if !tripped && assessed.is_none() {
        signals::best_contact_candidate(&state.db, case.id).await?
    } else {
        None
    };

    let action = decide(
        tripped,
        assessed,
        state.config.min_intent_confidence,
        contact.as_ref(),
    );

    match action {
        DeadlineAction::Complete => {
            cases::complete(
                &state.db,
                case.id,
                "Auto-completed: latest response assessed as fulfilling the request",
            )
            .await?;
            log_activity(
                &state.db,
                case.id,
                "case_auto_completed",
                "Response intent assessed as fulfilled; case completed",
                json!({ "intent": "fulfilled" }),
            )
            .await;
            Ok(true)
        }
        DeadlineAction::Propose(kind) => {
            let proposal = crate::proposals::upsert_proposal(
                state,
                case.id,
                kind,
                proposal_summary(kind, case, tripped),
                json!({
                    "deadline_at": case.response_deadline_at,
                    "assessed_intent": assessed.map(|a| a.intent.as_str()),
                    "intent_confidence": assessed.map(|a| a.confidence),
                    "contact_candidate": contact.as_ref().map(|c| json!({
                        "channel": c.channel,
                        "value": c.value,
                        "confidence": c.confidence,
                    })),
                    "circuit_breaker_tripped": tripped,
                }),
            )
            .await?;

            if kind.is_escalation() {
                state.notifier.notify(
                    Severity::Warning,
                    "Overdue case routed to escalation",
                    json!({
                        "case_id": case.id,
                        "proposal_id": proposal.id,
                        "circuit_breaker_tripped": tripped,
                    }),
                );
            }
            Ok(true)
        }
    }
}

fn proposal_summary(kind: ActionKind, case: &Case, tripped: bool) -> String {
    if tripped {
        return format!(
            "'{}' has accumulated repeated dismissed proposals; escalating instead of reproposing",
            case.case_name
        );
    }
    match kind {
        ActionKind::FeeDecision => format!(
            "Counterparty requested a fee on '{}'; decide whether to pay or contest",
            case.case_name
        ),
        ActionKind::Clarification => format!(
            "Counterparty asked to clarify or narrow '{}'",
            case.case_name
        ),
        ActionKind::Rebuttal => {
            format!("'{}' was denied; draft a rebuttal", case.case_name)
        }
        ActionKind::Resubmission => format!(
            "'{}' reached the wrong recipient; resubmit to the right office",
            case.case_name
        ),
        ActionKind::ContactCorrection => format!(
            "Research surfaced a better contact for overdue '{}'",
            case.case_name
        ),
        _ => format!(
            "'{}' is past its response deadline with no routable response",
            case.case_name
        ),
    }
}

#[cfg(test)]
mod tests {
    use caseflow_core::intent::{AssessedIntent, MessageIntent};
    use caseflow_core::proposal::ActionKind;

    use super::{DeadlineAction, decide, route_intent};
    use crate::store::signals::ContactCandidate;

    fn assessed(intent: MessageIntent, confidence: f64) -> Option<AssessedIntent> {
        Some(AssessedIntent { intent, confidence })
    }

    fn contact(confidence: f64) -> ContactCandidate {
        ContactCandidate {
            channel: "email".to_string(),
            value: "records@example.gov".to_string(),
            confidence,
        }
    }

    #[test]
    fn intents_route_to_their_actions() {
        assert_eq!(
            route_intent(MessageIntent::FeeRequest),
            DeadlineAction::Propose(ActionKind::FeeDecision)
        );
        assert_eq!(
            route_intent(MessageIntent::ClarificationNeeded),
            DeadlineAction::Propose(ActionKind::Clarification)
        );
        assert_eq!(
            route_intent(MessageIntent::Denial),
            DeadlineAction::Propose(ActionKind::Rebuttal)
        );
        assert_eq!(
            route_intent(MessageIntent::WrongRecipient),
            DeadlineAction::Propose(ActionKind::Resubmission)
        );
        assert_eq!(route_intent(MessageIntent::Fulfilled), DeadlineAction::Complete);
        assert_eq!(
            route_intent(MessageIntent::PhoneRequired),
            DeadlineAction::Propose(ActionKind::PhoneEscalation)
        );
    }

    #[test]
    fn circuit_breaker_overrides_classification() {
        let action = decide(
            true,
            assessed(MessageIntent::FeeRequest, 0.99),
            0.6,
            Some(&contact(0.9)),
        );
        assert_eq!(action, DeadlineAction::Propose(ActionKind::PhoneEscalation));
    }

    #[test]
    fn confident_intent_routes() {
        let action = decide(false, assessed(MessageIntent::Denial, 0.8), 0.6, None);
        assert_eq!(action, DeadlineAction::Propose(ActionKind::Rebuttal));
    }

    #[test]
    fn low_confidence_intent_falls_back_to_contact_research() {
        let action = decide(
            false,
            assessed(MessageIntent::Denial, 0.3),
            0.6,
            Some(&contact(0.9)),
        );
        assert_eq!(action, DeadlineAction::Propose(ActionKind::ContactCorrection));
    }

    #[test]
    fn no_signals_means_phone_escalation() {
        assert_eq!(
            decide(false, None, 0.6, None),
            DeadlineAction::Propose(ActionKind::PhoneEscalation)
        );
        assert_eq!(
            decide(false, None, 0.6, Some(&contact(0.2))),
            DeadlineAction::Propose(ActionKind::PhoneEscalation)
        );
    }
}
