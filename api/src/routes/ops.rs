use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use continuum_core::heartbeat::HeartbeatStatus;
use continuum_core::metrics::OpsSnapshot;
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/ops/metrics", get(ops_metrics))
}

/// Integrity posture of the running service.
#[derive(Serialize, utoipa::ToSchema)]
pub struct StatusSummary {
    pub signing_key_present: bool,
    /// False when fingerprints use a per-process salt.
    pub fingerprint_salt_persistent: bool,
    pub heartbeat: HeartbeatStatus,
    pub llm_provider: Option<String>,
    pub pending_usage_writes: usize,
    pub thresholds: Thresholds,
}

/// Routing thresholds in effect, as loaded at startup.
#[derive(Serialize, utoipa::ToSchema)]
pub struct Thresholds {
    pub suggest: f64,
    pub repair: f64,
    pub boundary_band: f64,
    pub llm_min_confidence: f64,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct OpsResponse {
    pub metrics: OpsSnapshot,
    pub status_summary: StatusSummary,
    pub uptime_seconds: u64,
}

/// Operational snapshot: decision, tone and scenario distributions, latency
/// percentiles, LLM usage, out-of-scope rate and integrity status
#[utoipa::path(
    get,
    path = "/api/v1/ops/metrics",
    responses(
        (status = 200, description = "Current operational snapshot", body = OpsResponse)
    ),
    tag = "ops"
)]
pub async fn ops_metrics(State(state): State<AppState>) -> Result<Json<OpsResponse>, AppError> {
    let metrics = state.metrics.snapshot();
    let log = state.log.clone();
    let heartbeat = tokio::task::spawn_blocking(move || log.heartbeat_status()).await?;

    Ok(Json(OpsResponse {
        metrics,
        status_summary: StatusSummary {
            signing_key_present: state.log.signing_key_present(),
            fingerprint_salt_persistent: state.fingerprinter.is_persistent(),
            heartbeat,
            llm_provider: state.repair.provider_name().map(str::to_string),
            pending_usage_writes: state.recorder.pending(),
            thresholds: Thresholds {
                suggest: state.config.suggest_threshold,
                repair: state.config.repair_threshold,
                boundary_band: state.config.boundary_band,
                llm_min_confidence: state.config.llm_min_confidence,
            },
        },
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use continuum_core::metrics::DecisionSample;
    use continuum_core::scenario::Scenario;
    use continuum_core::tone::{DecisionState, Mode, ToneType};
    use tower::ServiceExt;

    use crate::state::test_state;

    #[tokio::test]
    async fn reports_distribution_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), None);
        state.metrics.record_decision(DecisionSample {
            state: DecisionState::Guide,
            mode: Mode::Suggest,
            tone: ToneType::Sharp,
            scenario: Scenario::Workplace,
            confidence: 0.42,
            out_of_scope: false,
            repair: None,
            latency_ms: 7,
        });

        let response = super::router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/ops/metrics")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["metrics"]["decisions"]["GUIDE"], 1);
        assert_eq!(body["metrics"]["latency_ms"]["p50"], 7);
        assert_eq!(body["metrics"]["status"], "HEALTHY");
        assert_eq!(body["metrics"]["by_tone"]["Sharp"], 1);
        assert_eq!(body["metrics"]["by_tone"]["Anxious"], 0);
        assert_eq!(body["metrics"]["by_scenario"]["workplace"], 1);
        assert_eq!(body["metrics"]["avg_confidence"], 0.42);
        assert_eq!(body["metrics"]["late_events"], 0);
        assert_eq!(body["status_summary"]["signing_key_present"], true);
        assert_eq!(body["status_summary"]["heartbeat"]["reason"], "no_events");
        assert_eq!(body["status_summary"]["thresholds"]["repair"], 0.55);
    }
}
