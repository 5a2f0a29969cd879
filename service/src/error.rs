use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use caseflow_core::error::{self, ApiError};

use crate::platform::PlatformError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Resource not found (404)
    NotFound { resource: String },
    /// State conflict, e.g. a decision on an already-settled proposal (409)
    Conflict { message: String },
    /// Database error (500)
    Database(sqlx::Error),
    /// Execution platform rejected or failed a call (502)
    Platform(PlatformError),
    /// Internal error (500)
    Internal(String),
}

/// True when the error is a Postgres unique-constraint violation. Dispatch
/// treats this as "another dispatcher won the race", never as a failure.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // TODO: thread the request id from tower-http's request-id layer
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{} not found", resource),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Conflict { message } => (
                StatusCode::CONFLICT,
                ApiError {
                    error: error::codes::CONFLICT.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Database(err) => {
                tracing::error!(error = ?err, "database error");

                if is_unique_violation(&err) {
                    (
                        StatusCode::CONFLICT,
                        ApiError {
                            error: error::codes::CONFLICT.to_string(),
                            message: "A conflicting row already exists".to_string(),
                            field: None,
                            received: None,
                            request_id,
                            docs_hint: None,
                        },
                    )
                } else {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiError {
                            error: error::codes::INTERNAL_ERROR.to_string(),
                            message: "An internal error occurred".to_string(),
                            field: None,
                            received: None,
                            request_id,
                            docs_hint: None,
                        },
                    )
                }
            }
            AppError::Platform(err) => {
                tracing::error!(error = %err, "execution platform error");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: error::codes::PLATFORM_UNAVAILABLE.to_string(),
                        message: "The execution platform rejected or failed the request"
                            .to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some(
                            "The case stays eligible; a later sweep will retry the dispatch."
                                .to_string(),
                        ),
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<PlatformError> for AppError {
    fn from(err: PlatformError) -> Self {
        AppError::Platform(err)
    }
}

impl From<caseflow_core::error::CoreError> for AppError {
    fn from(err: caseflow_core::error::CoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}
