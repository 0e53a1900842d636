use std::time::Instant;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use continuum_core::error::ApiError;
use continuum_core::pipeline::Assessment;
use continuum_core::privacy::{self, RequestContext};
use continuum_core::metrics::DecisionSample;
use continuum_core::repair::{FallbackReason, RepairOutcome, RepairSource};
use continuum_core::router::reconcile_mode;
use continuum_core::scenario::Scenario;
use continuum_core::tone::{DecisionState, Mode, ToneType};
use continuum_core::usage::EventType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/analyze", post(analyze))
}

#[derive(Deserialize, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeRequest {
    /// One sentence of AI-directed or AI-generated text.
    pub text: String,
}

/// Governance decision. Never echoes the submitted text.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AnalyzeResponse {
    /// Usage event id; pass it back to /api/v1/feedback.
    pub log_id: Uuid,
    pub decision_state: DecisionState,
    pub mode: Mode,
    pub freq_type: ToneType,
    pub confidence_final: f64,
    pub scenario: Scenario,
    /// Present iff mode = repair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_source: Option<RepairSource>,
    /// Guidance attached in suggest mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_note: Option<String>,
    pub privacy_guard_ok: bool,
    pub latency_ms: u64,
}

/// Analyze one utterance and return its governance decision
///
/// Rejections (`too_short` / `too_long`) return 422 before any
/// classification. Out-of-scope content is a BLOCK decision, not an error.
#[utoipa::path(
    post,
    path = "/api/v1/analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Decision issued", body = AnalyzeResponse),
        (status = 400, description = "Malformed request body", body = ApiError),
        (status = 422, description = "Input outside the length bounds", body = ApiError),
        (status = 429, description = "Rate limited", body = ApiError)
    ),
    tag = "governance"
)]
pub async fn analyze(
    State(state): State<AppState>,
    AppJson(req): AppJson<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let started = Instant::now();

    let assessment = match state.pipeline.assess(&req.text) {
        Ok(assessment) => assessment,
        Err(rejection) => {
            let latency_ms = elapsed_ms(started);
            state.metrics.record_rejection(latency_ms);
            state.recorder.record(privacy::scrub(RequestContext::rejection(
                rejection.reason,
                latency_ms,
            )));
            tracing::info!(
                reason = rejection.reason.as_str(),
                length = rejection.length,
                "input rejected"
            );
            return Err(AppError::InputRejected(rejection));
        }
    };

    // Detached so a client disconnect during the repair call cannot drop
    // the usage event for a decision that was already made.
    let task_state = state.clone();
    let response = tokio::spawn(decide(task_state, assessment, started)).await?;
    Ok(Json(response))
}

async fn decide(state: AppState, assessment: Assessment, started: Instant) -> AnalyzeResponse {
    let route = assessment.route;
    let tone = assessment.tone();
    let fingerprint = state.fingerprinter.fingerprint(&assessment.utterance);

    let mut repair: Option<RepairOutcome> = match route.mode {
        Mode::Repair => Some(
            state
                .repair
                .repair(
                    assessment.utterance.text(),
                    tone,
                    assessment.scenario,
                    assessment.confidence,
                )
                .await,
        ),
        Mode::Suggest | Mode::NoOp => None,
    };

    let repair_note = assessment.repair_note().map(str::to_string);

    // The mode the payload actually delivers: a repair that hands back the
    // input unchanged repaired nothing.
    let text = assessment.utterance.text();
    let delivered_repair = repair
        .as_ref()
        .is_some_and(|outcome| outcome.text.trim() != text.trim());
    let observed = if delivered_repair {
        Mode::Repair
    } else if repair_note.is_some() {
        Mode::Suggest
    } else {
        Mode::NoOp
    };
    if let Some(correction) = reconcile_mode(&route, observed) {
        tracing::warn!(
            observed = correction.observed.as_str(),
            corrected_to = correction.corrected_to.as_str(),
            decision_state = correction.decision_state.as_str(),
            "mode truth correction applied"
        );
        state.metrics.record_truth_correction();
        repair = match correction.corrected_to {
            Mode::Repair => Some(RepairOutcome::fallback(text, tone, FallbackReason::Malformed)),
            Mode::Suggest | Mode::NoOp => None,
        };
    }
    let repaired_text = repair.as_ref().map(|outcome| outcome.text.clone());

    let latency_ms = elapsed_ms(started);
    let llm_used = repair.as_ref().is_some_and(RepairOutcome::llm_used);
    let event = privacy::scrub(RequestContext {
        event_type: EventType::Analysis,
        decision_state: Some(route.decision_state),
        mode: Some(route.mode),
        tone_type: Some(tone),
        scenario: Some(assessment.scenario),
        rejection_reason: None,
        latency_ms,
        llm_used,
        out_of_scope: assessment.classification.out_of_scope,
        fingerprint: Some(fingerprint.clone()),
        feedback: None,
    });
    let privacy_guard_ok = privacy::privacy_guard(&event);
    let log_id = event.event_id;

    state.metrics.record_decision(DecisionSample {
        state: route.decision_state,
        mode: route.mode,
        tone,
        scenario: assessment.scenario,
        confidence: assessment.confidence.value(),
        out_of_scope: assessment.classification.out_of_scope,
        repair: repair.as_ref().map(|outcome| outcome.source),
        latency_ms,
    });
    state.recorder.record(event);

    tracing::info!(
        log_id = %log_id,
        decision_state = route.decision_state.as_str(),
        mode = route.mode.as_str(),
        tone = tone.as_str(),
        reason = route.reason.as_str(),
        confidence = assessment.confidence.value(),
        latency_ms,
        llm_used,
        fingerprint = fingerprint.short(),
        "decision issued"
    );

    AnalyzeResponse {
        log_id,
        decision_state: route.decision_state,
        mode: route.mode,
        freq_type: tone,
        confidence_final: assessment.confidence.value(),
        scenario: assessment.scenario,
        repaired_text,
        repair_source: repair.map(|outcome| outcome.source),
        repair_note,
        privacy_guard_ok,
        latency_ms,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
