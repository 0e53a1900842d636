//! Off-request-path recording of usage events.
//!
//! Each event is appended from a detached task, so a client that hangs up
//! cannot cancel the write. Failures are retried, then counted; they never
//! reach the response.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use continuum_core::log::UsageLog;
use continuum_core::metrics::OpsMetrics;
use continuum_core::usage::UsageEvent;
use tokio::task::JoinHandle;

const APPEND_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Clone)]
pub struct Recorder {
    log: Arc<UsageLog>,
    metrics: Arc<OpsMetrics>,
    pending: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn new(log: Arc<UsageLog>, metrics: Arc<OpsMetrics>) -> Self {
        Self {
            log,
            metrics,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn the append. The returned handle resolves to whether it succeeded.
    pub fn record(&self, event: UsageEvent) -> JoinHandle<bool> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let recorder = self.clone();
        tokio::spawn(async move {
            let ok = recorder.append_with_retry(event).await;
            recorder.pending.fetch_sub(1, Ordering::SeqCst);
            ok
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait for in-flight appends, up to `limit`.
    pub async fn drain(&self, limit: Duration) {
        let deadline = tokio::time::Instant::now() + limit;
        while self.pending() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn append_with_retry(&self, event: UsageEvent) -> bool {
        for attempt in 1..=APPEND_ATTEMPTS {
            let log = Arc::clone(&self.log);
            let record = event.clone();
            match tokio::task::spawn_blocking(move || log.append(&record)).await {
                Ok(Ok(outcome)) => {
                    if let Some(month) = outcome.sealed {
                        tracing::info!(month = %month, "previous usage period sealed");
                    }
                    if outcome.carried_from.is_some() {
                        self.metrics.record_late_event();
                    }
                    return true;
                }
                Ok(Err(err)) => {
                    tracing::warn!(attempt, event_id = %event.event_id, error = %err, "usage append failed");
                }
                Err(err) => {
                    tracing::warn!(attempt, event_id = %event.event_id, error = %err, "usage append task failed");
                }
            }
            if attempt < APPEND_ATTEMPTS {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
        }
        self.metrics.record_log_failure();
        tracing::error!(
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            "usage event dropped after retries"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use continuum_core::normalize::RejectionReason;
    use continuum_core::privacy::{RequestContext, scrub};

    #[tokio::test]
    async fn records_and_drains() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(UsageLog::open(dir.path(), None).unwrap());
        let recorder = Recorder::new(Arc::clone(&log), Arc::new(OpsMetrics::default()));
        for _ in 0..5 {
            recorder.record(scrub(RequestContext::rejection(RejectionReason::TooShort, 0)));
        }
        recorder.drain(Duration::from_secs(5)).await;
        assert_eq!(recorder.pending(), 0);
        assert_eq!(log.read_events().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn late_events_are_counted() {
        use chrono::{TimeZone, Utc};
        use continuum_core::privacy::scrub_at;
        use uuid::Uuid;

        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(UsageLog::open(dir.path(), None).unwrap());
        let metrics = Arc::new(OpsMetrics::default());
        let recorder = Recorder::new(Arc::clone(&log), Arc::clone(&metrics));
        let at = |month, day| {
            let ts = Utc.with_ymd_and_hms(2026, month, day, 12, 0, 0).unwrap();
            scrub_at(RequestContext::rejection(RejectionReason::TooShort, 0), Uuid::now_v7(), ts)
        };

        assert!(recorder.record(at(3, 2)).await.unwrap());
        assert!(recorder.record(at(2, 27)).await.unwrap());
        assert_eq!(metrics.snapshot().late_events, 1);
        assert_eq!(log.meta().current_month.as_deref(), Some("2026-03"));
    }

    #[tokio::test]
    async fn failures_are_counted_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(UsageLog::open(dir.path(), None).unwrap());
        // A directory where the log file should be makes every append fail.
        std::fs::create_dir(dir.path().join(continuum_core::log::EVENTS_FILE)).unwrap();
        let metrics = Arc::new(OpsMetrics::default());
        let recorder = Recorder::new(log, Arc::clone(&metrics));

        let ok = recorder
            .record(scrub(RequestContext::rejection(RejectionReason::TooLong, 0)))
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(metrics.snapshot().log_failures, 1);
    }
}
