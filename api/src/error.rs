use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use continuum_core::error::{self, ApiError, UsageError};
use continuum_core::normalize::Rejection;

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
    /// Length gate refused the input (422). No classification was attempted.
    InputRejected(Rejection),
    /// Resource not found (404)
    NotFound { resource: String },
    /// Stored summary failed verification (409)
    SignatureInvalid { month: String },
    /// Usage log / summary workflow failure
    Usage(UsageError),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();
        let api_error = |code: &str, message: String| ApiError {
            error: code.to_string(),
            message,
            field: None,
            received: None,
            request_id: request_id.clone(),
            docs_hint: None,
        };

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    received,
                    docs_hint,
                    ..api_error(error::codes::VALIDATION_FAILED, message)
                },
            ),
            AppError::InputRejected(rejection) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError {
                    field: Some("text".to_string()),
                    received: Some(serde_json::json!({
                        "reason": rejection.reason,
                        "length": rejection.length,
                    })),
                    docs_hint: Some(format!(
                        "text must be {}..={} characters after whitespace normalization",
                        rejection.min_chars, rejection.max_chars
                    )),
                    ..api_error(
                        error::codes::INPUT_REJECTED,
                        format!("Input rejected: {}", rejection.reason.as_str()),
                    )
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                api_error(error::codes::NOT_FOUND, format!("{resource} not found")),
            ),
            AppError::SignatureInvalid { month } => {
                tracing::error!(month = %month, "stored usage summary failed verification");
                (
                    StatusCode::CONFLICT,
                    ApiError {
                        docs_hint: Some(
                            "Reconciliation must halt until the period is re-exported and re-verified."
                                .to_string(),
                        ),
                        ..api_error(
                            error::codes::SIGNATURE_INVALID,
                            format!("Usage summary for {month} is INVALID"),
                        )
                    },
                )
            }
            AppError::Usage(err) => usage_response(err, &api_error),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    api_error(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                    ),
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

fn usage_response(
    err: UsageError,
    api_error: &dyn Fn(&str, String) -> ApiError,
) -> (StatusCode, ApiError) {
    match err {
        UsageError::InvalidMonth(_) => (
            StatusCode::BAD_REQUEST,
            ApiError {
                field: Some("month".to_string()),
                docs_hint: Some("Use a UTC billing period in YYYY-MM form.".to_string()),
                ..api_error(error::codes::VALIDATION_FAILED, err.to_string())
            },
        ),
        UsageError::AlreadySealed(_) | UsageError::PeriodOpen(_) => (
            StatusCode::CONFLICT,
            api_error(error::codes::CONFLICT, err.to_string()),
        ),
        UsageError::MissingSigningKey => (
            StatusCode::SERVICE_UNAVAILABLE,
            ApiError {
                docs_hint: Some("Set USAGE_SIGNING_KEY (or LOG_SALT) and restart.".to_string()),
                ..api_error(error::codes::SERVICE_UNAVAILABLE, err.to_string())
            },
        ),
        UsageError::Io(_) | UsageError::Serde(_) => {
            tracing::error!(error = %err, "usage workflow failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                api_error(
                    error::codes::INTERNAL_ERROR,
                    "An internal error occurred".to_string(),
                ),
            )
        }
    }
}

impl From<UsageError> for AppError {
    fn from(err: UsageError) -> Self {
        AppError::Usage(err)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("background task failed: {err}"))
    }
}
