use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Intent label assigned to an inbound message by the classification
/// collaborator. The core consumes the stored label and confidence; it never
/// runs classification itself.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageIntent {
    /// The counterparty is asking for a fee before proceeding.
    FeeRequest,
    /// The counterparty needs the request clarified or narrowed.
    ClarificationNeeded,
    /// The request was denied.
    Denial,
    /// The request reached the wrong recipient or office.
    WrongRecipient,
    /// The request was fulfilled; the case can complete.
    Fulfilled,
    /// The counterparty asks to continue by phone.
    PhoneRequired,
}

impl MessageIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeeRequest => "fee_request",
            Self::ClarificationNeeded => "clarification_needed",
            Self::Denial => "denial",
            Self::WrongRecipient => "wrong_recipient",
            Self::Fulfilled => "fulfilled",
            Self::PhoneRequired => "phone_required",
        }
    }

    /// Lenient parse: classifier output drifts, so unknown labels map to
    /// `None` rather than an error and the caller falls back to the
    /// no-intent path.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fee_request" => Some(Self::FeeRequest),
            "clarification_needed" => Some(Self::ClarificationNeeded),
            "denial" => Some(Self::Denial),
            "wrong_recipient" => Some(Self::WrongRecipient),
            "fulfilled" => Some(Self::Fulfilled),
            "phone_required" => Some(Self::PhoneRequired),
            _ => None,
        }
    }
}

/// A stored classification result for the latest inbound message of a case.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy)]
pub struct AssessedIntent {
    pub intent: MessageIntent,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::MessageIntent;

    #[test]
    fn known_labels_parse() {
        for intent in [
            MessageIntent::FeeRequest,
            MessageIntent::ClarificationNeeded,
            MessageIntent::Denial,
            MessageIntent::WrongRecipient,
            MessageIntent::Fulfilled,
            MessageIntent::PhoneRequired,
        ] {
            assert_eq!(MessageIntent::parse(intent.as_str()), Some(intent));
        }
    }

    #[test]
    fn unknown_labels_parse_to_none() {
        assert_eq!(MessageIntent::parse("sarcasm"), None);
        assert_eq!(MessageIntent::parse(""), None);
    }
}
