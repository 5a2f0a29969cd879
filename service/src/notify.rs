use serde::Serialize;
use sqlx::PgPool;
use url::Url;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Outbound notification channel. Strictly best-effort: a failed delivery is
/// logged and swallowed, never propagated to the primary operation.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str, context: serde_json::Value);
}

/// Posts notifications to a webhook. Delivery happens on a spawned task so
/// the caller never waits on the channel.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, severity: Severity, message: &str, context: serde_json::Value) {
        let client = self.client.clone();
        let url = self.url.clone();
        let body = serde_json::json!({
            "severity": severity.as_str(),
            "message": message,
            "context": context,
        });

        tokio::spawn(async move {
            match client.post(url).json(&body).send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(status = %response.status(), "notification webhook rejected");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "notification delivery failed");
                }
            }
        });
    }
}

/// Used when no webhook is configured; notifications land in the logs only.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, severity: Severity, message: &str, context: serde_json::Value) {
        tracing::info!(severity = severity.as_str(), context = %context, "{}", message);
    }
}

const ACTIVITY_LOG_ATTEMPTS: u32 = 3;

/// Append to the case activity log. This feeds operational visibility, so
/// unlike notifications it gets a few retries before being dropped; a final
/// failure is still swallowed with a warning.
pub async fn log_activity(
    pool: &PgPool,
    case_id: i64,
    event_type: &str,
    description: &str,
    context: serde_json::Value,
) {
    for attempt in 1..=ACTIVITY_LOG_ATTEMPTS {
        let result = sqlx::query(
            "INSERT INTO activity_log (case_id, event_type, description, context) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(case_id)
        .bind(event_type)
        .bind(description)
        .bind(&context)
        .execute(pool)
        .await;

        match result {
            Ok(_) => return,
            Err(e) if attempt < ACTIVITY_LOG_ATTEMPTS => {
                tracing::debug!(error = %e, attempt, "activity log insert failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(200 * attempt as u64)).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, case_id, event_type, "activity log entry dropped");
            }
        }
    }
}
