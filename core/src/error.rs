use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Structured error response returned by the governance API.
/// Carries enough information for a caller to decide what to do next
/// without ever echoing the submitted text back.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "input_rejected")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Non-content value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const INPUT_REJECTED: &str = "input_rejected";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";
    pub const SIGNATURE_INVALID: &str = "signature_invalid";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const RATE_LIMITED: &str = "rate_limited";
}

/// Startup configuration defects. Never recoverable per request.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("length bounds invalid: min_chars={min} max_chars={max} (need 1 <= min <= max)")]
    LengthBounds { min: usize, max: usize },

    #[error(
        "thresholds invalid: suggest={suggest} repair={repair} (need 0 <= suggest <= repair <= 1)"
    )]
    Thresholds { suggest: f64, repair: f64 },

    #[error("{name} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("repair timeout must be > 0 ms")]
    RepairTimeout,
}

/// Failures of the usage log, summary sealing and signing workflow.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("usage log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("usage record (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("missing_signing_key")]
    MissingSigningKey,

    #[error("usage period {0} is already sealed")]
    AlreadySealed(String),

    #[error("usage period {0} is still open")]
    PeriodOpen(String),

    #[error("invalid usage month '{0}' (expected YYYY-MM)")]
    InvalidMonth(String),
}

pub type UsageResult<T> = Result<T, UsageError>;
