use std::sync::Arc;
use std::time::Instant;

use continuum_core::config::GovernanceConfig;
use continuum_core::log::UsageLog;
use continuum_core::metrics::OpsMetrics;
use continuum_core::pipeline::Pipeline;
use continuum_core::privacy::Fingerprinter;
use continuum_core::repair::RepairProvider;

use crate::recorder::Recorder;
use crate::repair::RepairEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GovernanceConfig>,
    pub pipeline: Pipeline,
    pub fingerprinter: Arc<Fingerprinter>,
    pub repair: Arc<RepairEngine>,
    pub log: Arc<UsageLog>,
    pub metrics: Arc<OpsMetrics>,
    pub recorder: Recorder,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: GovernanceConfig,
        fingerprinter: Fingerprinter,
        log: UsageLog,
        provider: Option<Arc<dyn RepairProvider>>,
    ) -> Self {
        let log = Arc::new(log);
        let metrics = Arc::new(OpsMetrics::default());
        Self {
            pipeline: Pipeline::from_config(&config),
            repair: Arc::new(RepairEngine::new(provider, &config)),
            fingerprinter: Arc::new(fingerprinter),
            recorder: Recorder::new(Arc::clone(&log), Arc::clone(&metrics)),
            log,
            metrics,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state(
    dir: &std::path::Path,
    provider: Option<Arc<dyn RepairProvider>>,
) -> AppState {
    use continuum_core::signing::SigningKey;

    let config = GovernanceConfig {
        data_dir: dir.to_path_buf(),
        repair_timeout_ms: 200,
        ..GovernanceConfig::default()
    };
    let log = UsageLog::open(dir, SigningKey::new("api-test-key")).expect("log should open");
    AppState::new(config, Fingerprinter::new("api-test-salt"), log, provider)
}
