use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use continuum_core::error::ApiError;
use continuum_core::signing::Verification;
use continuum_core::usage::{UsageMonth, UsageSummary};
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/usage/summaries/{month}", post(generate_summary))
        .route("/api/v1/usage/summaries/{month}/verify", get(verify_summary))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct SummaryResponse {
    pub summary: UsageSummary,
    /// Lowercase hex HMAC-SHA256 over the stored summary bytes
    pub signature: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct VerifyResponse {
    pub month: String,
    pub result: Verification,
}

/// Seal a closed billing period: aggregate, sign and persist
/// (summary.json, summary.sig). Succeeds exactly once per month.
#[utoipa::path(
    post,
    path = "/api/v1/usage/summaries/{month}",
    params(("month" = String, Path, description = "Billing period, YYYY-MM (UTC)")),
    responses(
        (status = 201, description = "Summary sealed", body = SummaryResponse),
        (status = 400, description = "Malformed month", body = ApiError),
        (status = 409, description = "Already sealed or still open", body = ApiError),
        (status = 503, description = "No signing key configured", body = ApiError)
    ),
    tag = "usage"
)]
pub async fn generate_summary(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<(StatusCode, Json<SummaryResponse>), AppError> {
    let month: UsageMonth = month.parse()?;
    let log = state.log.clone();
    let sealed = tokio::task::spawn_blocking(move || log.generate_summary(month, Utc::now())).await??;
    tracing::info!(
        month = %month,
        total_events = sealed.summary.counts.total_events,
        "usage summary sealed"
    );
    Ok((
        StatusCode::CREATED,
        Json(SummaryResponse {
            summary: sealed.summary,
            signature: sealed.signature,
        }),
    ))
}

/// Verify the stored (summary.json, summary.sig) pair for a period
///
/// INVALID is reported as 409 `signature_invalid`; dependent billing
/// reconciliation must stop.
#[utoipa::path(
    get,
    path = "/api/v1/usage/summaries/{month}/verify",
    params(("month" = String, Path, description = "Billing period, YYYY-MM (UTC)")),
    responses(
        (status = 200, description = "Stored pair is VALID", body = VerifyResponse),
        (status = 404, description = "Period not sealed", body = ApiError),
        (status = 409, description = "Stored pair is INVALID", body = ApiError)
    ),
    tag = "usage"
)]
pub async fn verify_summary(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<Json<VerifyResponse>, AppError> {
    let month: UsageMonth = month.parse()?;
    let log = state.log.clone();
    let verification = tokio::task::spawn_blocking(move || log.verify_summary(month)).await??;
    match verification {
        None => Err(AppError::NotFound {
            resource: format!("usage summary {month}"),
        }),
        Some(Verification::Invalid) => Err(AppError::SignatureInvalid {
            month: month.to_string(),
        }),
        Some(result @ Verification::Valid) => Ok(Json(VerifyResponse {
            month: month.to_string(),
            result,
        })),
    }
}
