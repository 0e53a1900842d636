use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use continuum_core::error::ApiError;
use continuum_core::privacy::{self, RequestContext};
use continuum_core::usage::FeedbackRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/feedback", post(submit_feedback))
}

#[derive(Deserialize, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct FeedbackRequest {
    /// `log_id` returned by /api/v1/analyze
    pub log_id: Uuid,
    /// 1..=5
    pub accuracy: u8,
    /// 1..=5
    pub helpful: u8,
    pub accepted: bool,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct FeedbackResponse {
    pub status: String,
    pub event_id: Uuid,
}

/// Record a rating of an earlier decision
#[utoipa::path(
    post,
    path = "/api/v1/feedback",
    request_body = FeedbackRequest,
    responses(
        (status = 202, description = "Feedback accepted", body = FeedbackResponse),
        (status = 400, description = "Invalid rating", body = ApiError)
    ),
    tag = "governance"
)]
pub async fn submit_feedback(
    State(state): State<AppState>,
    AppJson(req): AppJson<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackResponse>), AppError> {
    for (field, value) in [("accuracy", req.accuracy), ("helpful", req.helpful)] {
        if !(1..=5).contains(&value) {
            return Err(AppError::Validation {
                message: format!("{field} must be between 1 and 5"),
                field: Some(field.to_string()),
                received: Some(serde_json::json!(value)),
                docs_hint: None,
            });
        }
    }

    let event = privacy::scrub(RequestContext::feedback(FeedbackRecord {
        target_event_id: req.log_id,
        accuracy: req.accuracy,
        helpful: req.helpful,
        accepted: req.accepted,
    }));
    let event_id = event.event_id;
    state.metrics.record_feedback();
    state.recorder.record(event);
    tracing::info!(event_id = %event_id, target = %req.log_id, accepted = req.accepted, "feedback recorded");

    Ok((
        StatusCode::ACCEPTED,
        Json(FeedbackResponse {
            status: "recorded".to_string(),
            event_id,
        }),
    ))
}
