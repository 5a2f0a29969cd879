use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Where the platform reports an execution to be, bucketed from its raw
/// status string. Everything the core decides hangs off this bucket, never
/// off the raw string.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
    Pending,
    Accepted,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl StatusBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// The run was picked up remotely — submission verified.
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Accepted | Self::Running | Self::Completed)
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

/// Bucket a raw platform status string. Platforms decorate their statuses
/// ("FAILED: worker lost", "run_started (worker-3)"), so only the leading
/// status token counts.
pub fn bucket_status(raw: &str) -> StatusBucket {
    // Unwrap is safe: the pattern is a literal.
    let token_re = Regex::new(r"[A-Za-z_]+").expect("valid regex");
    let Some(token) = token_re.find(raw) else {
        return StatusBucket::Unknown;
    };

    match token.as_str().to_ascii_uppercase().as_str() {
        "PENDING" | "SUBMITTED" | "ENQUEUED" => StatusBucket::Pending,
        "ACCEPTED" | "QUEUED" => StatusBucket::Accepted,
        "STARTED" | "RUNNING" | "RUN_STARTED" | "IN_PROGRESS" => StatusBucket::Running,
        "COMPLETED" | "SUCCEEDED" | "DONE" => StatusBucket::Completed,
        "FAILED" | "ERROR" | "TIMED_OUT" => StatusBucket::Failed,
        "CANCELLED" | "CANCELED" | "ABORTED" => StatusBucket::Cancelled,
        _ => StatusBucket::Unknown,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform returned {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },
    #[error("platform response missing field: {0}")]
    MissingField(&'static str),
}

/// Options attached to a task submission.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Caller-supplied token the platform uses to collapse duplicate
    /// submissions into one logical execution.
    pub idempotency_key: String,
    /// How long the platform should honor the key, in seconds.
    pub idempotency_key_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    /// Correlation id for the remote execution.
    pub execution_id: String,
}

/// The external task-execution platform. The core only ever submits work and
/// polls status; there is no way to cancel an in-flight remote execution.
pub trait ExecutionPlatform: Send + Sync {
    fn submit(
        &self,
        task_kind: String,
        payload: serde_json::Value,
        opts: SubmitOptions,
    ) -> BoxFuture<Result<SubmitReceipt, PlatformError>>;

    fn get_status(&self, execution_id: String) -> BoxFuture<Result<StatusBucket, PlatformError>>;
}

/// Production client speaking JSON over HTTP to the platform.
pub struct HttpPlatform {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpPlatform {
    pub fn new(base_url: Url, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        let mut req = self.client.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    execution_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Option<String>,
}

impl ExecutionPlatform for HttpPlatform {
    fn submit(
        &self,
        task_kind: String,
        payload: serde_json::Value,
        opts: SubmitOptions,
    ) -> BoxFuture<Result<SubmitReceipt, PlatformError>> {
        let req = self.request(reqwest::Method::POST, "/v1/tasks");
        Box::pin(async move {
            let response = req
                .json(&serde_json::json!({
                    "task_kind": task_kind,
                    "payload": payload,
                    "idempotency_key": opts.idempotency_key,
                    "idempotency_key_ttl_seconds": opts.idempotency_key_ttl_seconds,
                }))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(PlatformError::UnexpectedResponse {
                    status: status.as_u16(),
                    body,
                });
            }

            let body: SubmitResponse = response.json().await?;
            let execution_id = body
                .execution_id
                .ok_or(PlatformError::MissingField("execution_id"))?;
            Ok(SubmitReceipt { execution_id })
        })
    }

    fn get_status(&self, execution_id: String) -> BoxFuture<Result<StatusBucket, PlatformError>> {
        let req = self.request(
            reqwest::Method::GET,
            &format!("/v1/tasks/{}/status", execution_id),
        );
        Box::pin(async move {
            let response = req.send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(PlatformError::UnexpectedResponse {
                    status: status.as_u16(),
                    body,
                });
            }

            let body: StatusResponse = response.json().await?;
            let raw = body.status.ok_or(PlatformError::MissingField("status"))?;
            Ok(bucket_status(&raw))
        })
    }
}

/// Deterministic in-memory platform for tests: scripted statuses, recorded
/// submissions, and idempotency-key collapsing like the real thing.
#[derive(Default)]
pub struct StubPlatform {
    inner: Mutex<StubState>,
}

#[derive(Default)]
struct StubState {
    submissions: Vec<(String, String)>,
    executions: std::collections::HashMap<String, StatusBucket>,
    by_key: std::collections::HashMap<String, String>,
    next_id: u64,
}

impl StubPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, execution_id: &str, bucket: StatusBucket) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.executions.insert(execution_id.to_string(), bucket);
    }

    pub fn submission_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.submissions.len()
    }

    /// Distinct remote executions, after idempotency-key collapsing.
    pub fn execution_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.by_key.len()
    }
}

impl ExecutionPlatform for StubPlatform {
    fn submit(
        &self,
        task_kind: String,
        _payload: serde_json::Value,
        opts: SubmitOptions,
    ) -> BoxFuture<Result<SubmitReceipt, PlatformError>> {
        let execution_id = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .submissions
                .push((task_kind, opts.idempotency_key.clone()));
            if let Some(existing) = inner.by_key.get(&opts.idempotency_key) {
                existing.clone()
            } else {
                inner.next_id += 1;
                let id = format!("exec-{}", inner.next_id);
                inner.by_key.insert(opts.idempotency_key, id.clone());
                inner.executions.insert(id.clone(), StatusBucket::Pending);
                id
            }
        };
        Box::pin(async move { Ok(SubmitReceipt { execution_id }) })
    }

    fn get_status(&self, execution_id: String) -> BoxFuture<Result<StatusBucket, PlatformError>> {
        let bucket = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.executions.get(&execution_id).copied()
        };
        Box::pin(async move {
            bucket.ok_or(PlatformError::UnexpectedResponse {
                status: 404,
                body: execution_id,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionPlatform, StatusBucket, StubPlatform, SubmitOptions, bucket_status};

    #[test]
    fn bucketing_handles_decorated_statuses() {
        assert_eq!(bucket_status("PENDING"), StatusBucket::Pending);
        assert_eq!(bucket_status("queued"), StatusBucket::Accepted);
        assert_eq!(bucket_status("RUN_STARTED (worker-3)"), StatusBucket::Running);
        assert_eq!(bucket_status("FAILED: worker lost"), StatusBucket::Failed);
        assert_eq!(bucket_status("canceled"), StatusBucket::Cancelled);
        assert_eq!(bucket_status("COMPLETED"), StatusBucket::Completed);
        assert_eq!(bucket_status("???"), StatusBucket::Unknown);
        assert_eq!(bucket_status("SHINY_NEW_STATE"), StatusBucket::Unknown);
    }

    #[test]
    fn started_and_terminal_classification() {
        assert!(StatusBucket::Accepted.is_started());
        assert!(StatusBucket::Running.is_started());
        assert!(StatusBucket::Completed.is_started());
        assert!(!StatusBucket::Pending.is_started());
        assert!(StatusBucket::Failed.is_terminal_failure());
        assert!(StatusBucket::Cancelled.is_terminal_failure());
        assert!(!StatusBucket::Unknown.is_terminal_failure());
    }

    #[tokio::test]
    async fn stub_collapses_submissions_by_idempotency_key() {
        let stub = StubPlatform::new();
        let opts = SubmitOptions {
            idempotency_key: "case_decision-42-abc".to_string(),
            idempotency_key_ttl_seconds: 3600,
        };

        let first = stub
            .submit("case_decision".into(), serde_json::json!({}), opts.clone())
            .await
            .unwrap();
        let second = stub
            .submit("case_decision".into(), serde_json::json!({}), opts)
            .await
            .unwrap();

        assert_eq!(first.execution_id, second.execution_id);
        assert_eq!(stub.submission_count(), 2);
        assert_eq!(stub.execution_count(), 1);
    }
}
