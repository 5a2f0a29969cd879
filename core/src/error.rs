use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response — designed for operators and agents alike.
/// Every error carries enough information to understand what went wrong
/// without consulting server logs.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "not_found")
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the service API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const ACTIVE_RUN_EXISTS: &str = "active_run_exists";
    pub const PLATFORM_UNAVAILABLE: &str = "platform_unavailable";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Errors raised by the shared domain types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown {entity} status value: {value}")]
    UnknownStatus { entity: &'static str, value: String },
}
