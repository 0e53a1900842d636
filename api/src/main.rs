use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use continuum_core::config::GovernanceConfig;
use continuum_core::log::UsageLog;
use continuum_core::privacy::Fingerprinter;
use continuum_core::repair::RepairProvider;
use continuum_core::signing::SigningKey;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod extract;
mod middleware;
mod recorder;
mod repair;
mod routes;
mod state;

/// How long shutdown waits for detached usage writes before checkpointing.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Continuum API",
        version = "0.1.0",
        description = "Output-governance layer: tone classification, calibrated routing, \
                       bounded repair and a signed, content-free usage log."
    ),
    paths(
        routes::health::root,
        routes::health::health_check,
        routes::analyze::analyze,
        routes::feedback::submit_feedback,
        routes::ops::ops_metrics,
        routes::usage::generate_summary,
        routes::usage::verify_summary,
    ),
    components(schemas(
        HealthResponse,
        routes::health::RootResponse,
        routes::analyze::AnalyzeRequest,
        routes::analyze::AnalyzeResponse,
        routes::feedback::FeedbackRequest,
        routes::feedback::FeedbackResponse,
        routes::ops::OpsResponse,
        routes::ops::StatusSummary,
        routes::ops::Thresholds,
        routes::usage::SummaryResponse,
        routes::usage::VerifyResponse,
        continuum_core::error::ApiError,
        continuum_core::tone::ToneType,
        continuum_core::tone::Mode,
        continuum_core::tone::DecisionState,
        continuum_core::scenario::Scenario,
        continuum_core::normalize::RejectionReason,
        continuum_core::repair::RepairSource,
        continuum_core::repair::FallbackReason,
        continuum_core::signing::Verification,
        continuum_core::heartbeat::HeartbeatStatus,
        continuum_core::metrics::DecisionHealth,
        continuum_core::metrics::LatencyPercentiles,
        continuum_core::metrics::OpsSnapshot,
        continuum_core::usage::UsageSummary,
        continuum_core::usage::SummaryKind,
        continuum_core::usage::UsageCounts,
        continuum_core::usage::DecisionBreakdown,
        continuum_core::usage::ModeBreakdown,
    )),
    tags(
        (name = "system", description = "Banner and readiness"),
        (name = "governance", description = "Decision pipeline and feedback"),
        (name = "ops", description = "Operational metrics"),
        (name = "usage", description = "Signed monthly usage summaries"),
    )
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub usage_log_ok: bool,
    pub signing_key_present: bool,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "continuum_api=info,continuum_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = GovernanceConfig::from_env();
    if let Err(err) = config.validate() {
        tracing::error!(error = %err, "invalid configuration");
        std::process::exit(1);
    }

    let signing_key = SigningKey::from_env();
    if signing_key.is_none() {
        tracing::warn!(
            "USAGE_SIGNING_KEY and LOG_SALT are unset; summaries and heartbeats cannot be signed"
        );
    }

    let log = match UsageLog::open(config.data_dir.clone(), signing_key) {
        Ok(log) => log,
        Err(err) => {
            tracing::error!(error = %err, data_dir = %config.data_dir.display(), "usage log unavailable");
            std::process::exit(1);
        }
    };

    let provider = repair::ChatCompletionsProvider::from_env()
        .map(|provider| Arc::new(provider) as Arc<dyn RepairProvider>);
    if provider.is_none() {
        tracing::info!("LLM_API_URL unset; repairs use the deterministic fallback");
    }

    let app_state = state::AppState::new(config, Fingerprinter::from_env(), log, provider);

    // CORS
    let cors_layer = middleware::cors::build_cors_layer();

    // Per-endpoint rate limiting
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::analyze::router().layer(middleware::rate_limit::analyze_layer()))
        .merge(routes::feedback::router().layer(middleware::rate_limit::write_layer()))
        .merge(routes::usage::router().layer(middleware::rate_limit::write_layer()))
        .merge(routes::ops::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state.clone());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(7860);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Continuum API listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!(error = %err, "server error");
    }

    app_state.recorder.drain(DRAIN_TIMEOUT).await;
    let log = Arc::clone(&app_state.log);
    match tokio::task::spawn_blocking(move || log.write_checkpoint(chrono::Utc::now())).await {
        Ok(Ok(sealed)) => tracing::info!(
            month = %sealed.summary.month,
            total_events = sealed.summary.counts.total_events,
            path = %sealed.summary_path.display(),
            "shutdown checkpoint written"
        ),
        Ok(Err(err)) => tracing::warn!(error = %err, "shutdown checkpoint skipped"),
        Err(err) => tracing::error!(error = %err, "shutdown checkpoint task failed"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
