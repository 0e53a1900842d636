//! Operational metrics, owned and injected (no process-wide singleton).
//!
//! Every counter is an atomic and the latency window is a ring of atomic
//! slots, so writers never take a lock and never wait on a snapshot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use utoipa::ToSchema;

use crate::repair::RepairSource;
use crate::scenario::Scenario;
use crate::tone::{DecisionState, Mode, ToneType};
use crate::usage::{DecisionBreakdown, ModeBreakdown};

/// Latency samples kept for percentile reporting.
pub const DEFAULT_LATENCY_WINDOW: usize = 1024;

const HEALTHY_MAX_RATE: f64 = 0.02;
const WATCH_MAX_RATE: f64 = 0.08;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionHealth {
    NoTraffic,
    Healthy,
    Watch,
    Risk,
}

impl DecisionHealth {
    pub fn from_counts(total: u64, failures: u64) -> Self {
        if total == 0 {
            return DecisionHealth::NoTraffic;
        }
        let rate = failures as f64 / total as f64;
        if rate <= HEALTHY_MAX_RATE {
            DecisionHealth::Healthy
        } else if rate <= WATCH_MAX_RATE {
            DecisionHealth::Watch
        } else {
            DecisionHealth::Risk
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct LatencyPercentiles {
    pub samples: usize,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

/// One routed decision as seen by the counters.
#[derive(Debug, Clone, Copy)]
pub struct DecisionSample {
    pub state: DecisionState,
    pub mode: Mode,
    pub tone: ToneType,
    pub scenario: Scenario,
    pub confidence: f64,
    pub out_of_scope: bool,
    pub repair: Option<RepairSource>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OpsSnapshot {
    pub total_requests: u64,
    pub decisions: DecisionBreakdown,
    pub modes: ModeBreakdown,
    #[schema(value_type = BTreeMap<String, u64>)]
    pub by_tone: BTreeMap<ToneType, u64>,
    #[schema(value_type = BTreeMap<String, u64>)]
    pub by_scenario: BTreeMap<Scenario, u64>,
    /// Mean calibrated confidence over routed decisions.
    pub avg_confidence: f64,
    pub rejections: u64,
    pub feedback: u64,
    pub latency_ms: LatencyPercentiles,
    pub repairs: u64,
    pub fallbacks: u64,
    /// Share of repairs served by the provider rather than the fallback.
    pub llm_usage_rate: f64,
    pub out_of_scope_rate: f64,
    pub truth_corrections: u64,
    pub log_failures: u64,
    /// Events stamped for a closed period and recorded in the open one.
    pub late_events: u64,
    pub errors: u64,
    pub status: DecisionHealth,
}

pub struct OpsMetrics {
    decisions: [AtomicU64; 3],
    modes: [AtomicU64; 3],
    tones: [AtomicU64; ToneType::ALL.len()],
    scenarios: [AtomicU64; Scenario::ALL.len()],
    /// Sum of confidences in thousandths; confidences sit on a 0.001 grid.
    confidence_milli: AtomicU64,
    rejections: AtomicU64,
    feedback: AtomicU64,
    repairs_llm: AtomicU64,
    repairs_fallback: AtomicU64,
    out_of_scope: AtomicU64,
    truth_corrections: AtomicU64,
    log_failures: AtomicU64,
    late_events: AtomicU64,
    errors: AtomicU64,
    cursor: AtomicUsize,
    /// Latency + 1 per slot; 0 marks an empty slot.
    latencies: Box<[AtomicU64]>,
}

impl Default for OpsMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl OpsMetrics {
    pub fn new(window: usize) -> Self {
        Self {
            decisions: Default::default(),
            modes: Default::default(),
            tones: Default::default(),
            scenarios: Default::default(),
            confidence_milli: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            feedback: AtomicU64::new(0),
            repairs_llm: AtomicU64::new(0),
            repairs_fallback: AtomicU64::new(0),
            out_of_scope: AtomicU64::new(0),
            truth_corrections: AtomicU64::new(0),
            log_failures: AtomicU64::new(0),
            late_events: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
            latencies: (0..window.max(1)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn record_decision(&self, sample: DecisionSample) {
        self.decisions[state_slot(sample.state)].fetch_add(1, Ordering::Relaxed);
        self.modes[mode_slot(sample.mode)].fetch_add(1, Ordering::Relaxed);
        self.tones[slot_of(&ToneType::ALL, sample.tone)].fetch_add(1, Ordering::Relaxed);
        self.scenarios[slot_of(&Scenario::ALL, sample.scenario)].fetch_add(1, Ordering::Relaxed);
        let milli = (sample.confidence.clamp(0.0, 1.0) * 1000.0).round() as u64;
        self.confidence_milli.fetch_add(milli, Ordering::Relaxed);
        if sample.out_of_scope {
            self.out_of_scope.fetch_add(1, Ordering::Relaxed);
        }
        match sample.repair {
            Some(RepairSource::Provider) => {
                self.repairs_llm.fetch_add(1, Ordering::Relaxed);
            }
            Some(RepairSource::Fallback) => {
                self.repairs_fallback.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }
        self.record_latency(sample.latency_ms);
    }

    pub fn record_rejection(&self, latency_ms: u64) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_ms);
    }

    pub fn record_feedback(&self) {
        self.feedback.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_truth_correction(&self) {
        self.truth_corrections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_failure(&self) {
        self.log_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_event(&self) {
        self.late_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency_ms: u64) {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % self.latencies.len();
        self.latencies[slot].store(latency_ms.saturating_add(1), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OpsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let decisions = DecisionBreakdown {
            allow: load(&self.decisions[0]),
            guide: load(&self.decisions[1]),
            block: load(&self.decisions[2]),
        };
        let modes = ModeBreakdown {
            repair: load(&self.modes[0]),
            suggest: load(&self.modes[1]),
            no_op: load(&self.modes[2]),
        };
        let total_requests = decisions.allow + decisions.guide + decisions.block;
        let by_tone = ToneType::ALL
            .iter()
            .zip(&self.tones)
            .map(|(tone, count)| (*tone, load(count)))
            .collect();
        let by_scenario = Scenario::ALL
            .iter()
            .zip(&self.scenarios)
            .map(|(scenario, count)| (*scenario, load(count)))
            .collect();
        let avg_confidence = if total_requests == 0 {
            0.0
        } else {
            (load(&self.confidence_milli) as f64 / total_requests as f64).round() / 1000.0
        };
        let repairs_llm = load(&self.repairs_llm);
        let fallbacks = load(&self.repairs_fallback);
        let repairs = repairs_llm + fallbacks;
        let rejections = load(&self.rejections);
        let feedback = load(&self.feedback);
        let log_failures = load(&self.log_failures);
        let errors = load(&self.errors);

        let mut samples: Vec<u64> = self
            .latencies
            .iter()
            .map(load)
            .filter(|v| *v > 0)
            .map(|v| v - 1)
            .collect();
        samples.sort_unstable();

        OpsSnapshot {
            total_requests,
            decisions,
            modes,
            by_tone,
            by_scenario,
            avg_confidence,
            rejections,
            feedback,
            latency_ms: LatencyPercentiles {
                samples: samples.len(),
                p50: percentile(&samples, 50.0),
                p95: percentile(&samples, 95.0),
                p99: percentile(&samples, 99.0),
            },
            repairs,
            fallbacks,
            llm_usage_rate: ratio(repairs_llm, repairs),
            out_of_scope_rate: ratio(load(&self.out_of_scope), total_requests),
            truth_corrections: load(&self.truth_corrections),
            log_failures,
            late_events: load(&self.late_events),
            errors,
            status: DecisionHealth::from_counts(
                total_requests + rejections + feedback,
                log_failures + errors,
            ),
        }
    }
}

fn state_slot(state: DecisionState) -> usize {
    match state {
        DecisionState::Allow => 0,
        DecisionState::Guide => 1,
        DecisionState::Block => 2,
    }
}

fn mode_slot(mode: Mode) -> usize {
    match mode {
        Mode::Repair => 0,
        Mode::Suggest => 1,
        Mode::NoOp => 2,
    }
}

fn slot_of<T: PartialEq>(all: &[T], value: T) -> usize {
    all.iter().position(|v| *v == value).unwrap_or(0)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(state: DecisionState, mode: Mode, latency_ms: u64) -> DecisionSample {
        DecisionSample {
            state,
            mode,
            tone: ToneType::Unknown,
            scenario: Scenario::General,
            confidence: 0.0,
            out_of_scope: false,
            repair: None,
            latency_ms,
        }
    }

    #[test]
    fn empty_metrics_report_no_traffic() {
        let snapshot = OpsMetrics::default().snapshot();
        assert_eq!(snapshot.status, DecisionHealth::NoTraffic);
        assert_eq!(snapshot.latency_ms.p99, 0);
        assert_eq!(snapshot.llm_usage_rate, 0.0);
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let metrics = OpsMetrics::new(200);
        for latency in 1..=100 {
            metrics.record_decision(sample(DecisionState::Allow, Mode::NoOp, latency));
        }
        let latency = metrics.snapshot().latency_ms;
        assert_eq!(latency.samples, 100);
        assert_eq!(latency.p50, 50);
        assert_eq!(latency.p95, 95);
        assert_eq!(latency.p99, 99);
    }

    #[test]
    fn latency_window_is_bounded() {
        let metrics = OpsMetrics::new(10);
        for latency in 0..1000 {
            metrics.record_rejection(latency);
        }
        let latency = metrics.snapshot().latency_ms;
        assert_eq!(latency.samples, 10);
        assert_eq!(latency.p50, 994);
    }

    #[test]
    fn rates_and_counts() {
        let metrics = OpsMetrics::default();
        metrics.record_decision(DecisionSample {
            repair: Some(RepairSource::Provider),
            ..sample(DecisionState::Guide, Mode::Repair, 5)
        });
        metrics.record_decision(DecisionSample {
            repair: Some(RepairSource::Fallback),
            ..sample(DecisionState::Guide, Mode::Repair, 5)
        });
        metrics.record_decision(DecisionSample {
            out_of_scope: true,
            ..sample(DecisionState::Block, Mode::NoOp, 1)
        });
        metrics.record_decision(sample(DecisionState::Allow, Mode::NoOp, 1));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.decisions.guide, 2);
        assert_eq!(snapshot.modes.repair, 2);
        assert_eq!(snapshot.llm_usage_rate, 0.5);
        assert_eq!(snapshot.out_of_scope_rate, 0.25);
        assert_eq!(snapshot.status, DecisionHealth::Healthy);
    }

    #[test]
    fn tone_and_scenario_distributions() {
        let metrics = OpsMetrics::default();
        metrics.record_decision(DecisionSample {
            tone: ToneType::Anxious,
            scenario: Scenario::Support,
            confidence: 0.9,
            ..sample(DecisionState::Guide, Mode::Repair, 3)
        });
        metrics.record_decision(DecisionSample {
            tone: ToneType::Anxious,
            scenario: Scenario::Workplace,
            confidence: 0.6,
            ..sample(DecisionState::Guide, Mode::Repair, 3)
        });
        metrics.record_decision(DecisionSample {
            confidence: 0.15,
            ..sample(DecisionState::Allow, Mode::NoOp, 3)
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.by_tone[&ToneType::Anxious], 2);
        assert_eq!(snapshot.by_tone[&ToneType::Unknown], 1);
        assert_eq!(snapshot.by_tone[&ToneType::Cold], 0);
        assert_eq!(snapshot.by_tone.len(), ToneType::ALL.len());
        assert_eq!(snapshot.by_scenario[&Scenario::Support], 1);
        assert_eq!(snapshot.by_scenario[&Scenario::General], 1);
        assert_eq!(snapshot.avg_confidence, 0.55);

        assert_eq!(OpsMetrics::default().snapshot().avg_confidence, 0.0);
    }

    #[test]
    fn late_events_are_counted() {
        let metrics = OpsMetrics::default();
        metrics.record_late_event();
        assert_eq!(metrics.snapshot().late_events, 1);
    }

    #[test]
    fn health_thresholds() {
        assert_eq!(DecisionHealth::from_counts(100, 2), DecisionHealth::Healthy);
        assert_eq!(DecisionHealth::from_counts(100, 3), DecisionHealth::Watch);
        assert_eq!(DecisionHealth::from_counts(100, 8), DecisionHealth::Watch);
        assert_eq!(DecisionHealth::from_counts(100, 9), DecisionHealth::Risk);
        assert_eq!(
            serde_json::to_string(&DecisionHealth::NoTraffic).unwrap(),
            "\"NO_TRAFFIC\""
        );
    }

    #[test]
    fn concurrent_writers_lose_no_updates() {
        let metrics = Arc::new(OpsMetrics::new(64));
        let writers: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        metrics.record_decision(sample(DecisionState::Guide, Mode::Suggest, i));
                        metrics.record_truth_correction();
                    }
                })
            })
            .collect();
        let reader = {
            let metrics = Arc::clone(&metrics);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let snapshot = metrics.snapshot();
                    assert!(snapshot.latency_ms.samples <= 64);
                }
            })
        };
        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 8000);
        assert_eq!(snapshot.modes.suggest, 8000);
        assert_eq!(snapshot.truth_corrections, 8000);
    }
}
