use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::proposal::ActionKind;
use crate::run::TriggerKind;

const KEY_DIGEST_LEN: usize = 24;

/// Stable idempotency key for a logical unit of work, derived from
/// (task kind, case, message, trigger kind). Repeated submissions of the
/// same unit within the platform's key lifetime collapse into one remote
/// execution.
pub fn idempotency_key(
    task_kind: &str,
    case_id: i64,
    message_id: Option<i64>,
    trigger: TriggerKind,
) -> String {
    derive(task_kind, case_id, message_id, trigger, None)
}

/// Idempotency key with a salt mixed in. Used when a *new* remote execution
/// is wanted for the same identity: stale-queued replacements salt with the
/// attempt number, proposal retries with the retry counter.
pub fn salted_idempotency_key(
    task_kind: &str,
    case_id: i64,
    message_id: Option<i64>,
    trigger: TriggerKind,
    salt: &str,
) -> String {
    derive(task_kind, case_id, message_id, trigger, Some(salt))
}

fn derive(
    task_kind: &str,
    case_id: i64,
    message_id: Option<i64>,
    trigger: TriggerKind,
    salt: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_kind.as_bytes());
    hasher.update(b":");
    hasher.update(case_id.to_string().as_bytes());
    hasher.update(b":");
    match message_id {
        Some(id) => hasher.update(id.to_string().as_bytes()),
        None => hasher.update(b"-"),
    }
    hasher.update(b":");
    hasher.update(trigger.as_str().as_bytes());
    if let Some(salt) = salt {
        hasher.update(b":");
        hasher.update(salt.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}-{}", task_kind, case_id, &digest[..KEY_DIGEST_LEN])
}

/// Per-cycle key for the follow-up sweep: same case, same follow-up count,
/// same calendar day ⇒ same key ⇒ re-running the sweep within the cycle is
/// a no-op.
pub fn scheduled_key(case_id: i64, follow_ups_sent: i32, date: NaiveDate) -> String {
    format!("followup:{}:{}:{}", case_id, follow_ups_sent, date.format("%Y-%m-%d"))
}

/// Dedup key for proposals: one live proposal per logical action per case.
pub fn proposal_dedup_key(case_id: i64, action: ActionKind) -> String {
    format!("{}:{}", action.as_str(), case_id)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{idempotency_key, proposal_dedup_key, salted_idempotency_key, scheduled_key};
    use crate::proposal::ActionKind;
    use crate::run::TriggerKind;

    #[test]
    fn idempotency_key_is_stable() {
        let a = idempotency_key("case_pipeline", 42, Some(7), TriggerKind::InboundMessage);
        let b = idempotency_key("case_pipeline", 42, Some(7), TriggerKind::InboundMessage);
        assert_eq!(a, b);
        assert!(a.starts_with("case_pipeline-42-"));
    }

    #[test]
    fn idempotency_key_varies_with_identity() {
        let base = idempotency_key("case_pipeline", 42, Some(7), TriggerKind::InboundMessage);
        assert_ne!(
            base,
            idempotency_key("case_pipeline", 43, Some(7), TriggerKind::InboundMessage)
        );
        assert_ne!(
            base,
            idempotency_key("case_pipeline", 42, Some(8), TriggerKind::InboundMessage)
        );
        assert_ne!(
            base,
            idempotency_key("case_pipeline", 42, None, TriggerKind::InboundMessage)
        );
        assert_ne!(
            base,
            idempotency_key("case_pipeline", 42, Some(7), TriggerKind::Reset)
        );
        assert_ne!(
            base,
            idempotency_key("followup_pipeline", 42, Some(7), TriggerKind::InboundMessage)
        );
    }

    #[test]
    fn salt_yields_a_fresh_key() {
        let base = idempotency_key("case_pipeline", 42, None, TriggerKind::FollowupTrigger);
        let salted =
            salted_idempotency_key("case_pipeline", 42, None, TriggerKind::FollowupTrigger, "2");
        assert_ne!(base, salted);
        assert_eq!(
            salted,
            salted_idempotency_key("case_pipeline", 42, None, TriggerKind::FollowupTrigger, "2")
        );
    }

    #[test]
    fn scheduled_key_format() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(scheduled_key(42, 1, date), "followup:42:1:2025-03-09");
    }

    #[test]
    fn proposal_dedup_key_is_per_action_and_case() {
        assert_eq!(
            proposal_dedup_key(42, ActionKind::Rebuttal),
            "rebuttal:42"
        );
        assert_ne!(
            proposal_dedup_key(42, ActionKind::Rebuttal),
            proposal_dedup_key(42, ActionKind::Clarification)
        );
    }
}
