//! Deterministic decision router.
//!
//! Evaluated once per request. Its `(mode, decision_state)` output is the
//! single source of truth; any other mode value observed while assembling a
//! response is derived data and is corrected to match, with the correction
//! reported to the caller for logging.

use serde::Serialize;
use utoipa::ToSchema;

use crate::calibrate::CalibratedConfidence;
use crate::config::GovernanceConfig;
use crate::tone::{DecisionState, Mode, ToneType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterConfig {
    pub suggest_threshold: f64,
    pub repair_threshold: f64,
    pub boundary_band: f64,
    pub unknown_pressure_floor: f64,
}

impl RouterConfig {
    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self {
            suggest_threshold: config.suggest_threshold,
            repair_threshold: config.repair_threshold,
            boundary_band: config.boundary_band,
            unknown_pressure_floor: config.unknown_pressure_floor,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from_config(&GovernanceConfig::default())
    }
}

/// Why the router chose its output. Categorical only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    OutOfScope,
    RepairThreshold,
    SuggestThreshold,
    UnknownHighPressure,
    UnknownLowPressure,
    BelowSuggest,
}

impl RouteReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteReason::OutOfScope => "out_of_scope",
            RouteReason::RepairThreshold => "repair_threshold",
            RouteReason::SuggestThreshold => "suggest_threshold",
            RouteReason::UnknownHighPressure => "unknown_high_pressure",
            RouteReason::UnknownLowPressure => "unknown_low_pressure",
            RouteReason::BelowSuggest => "below_suggest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub mode: Mode,
    pub decision_state: DecisionState,
    pub reason: RouteReason,
}

impl Route {
    const fn new(mode: Mode, decision_state: DecisionState, reason: RouteReason) -> Self {
        Self {
            mode,
            decision_state,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionRouter {
    config: RouterConfig,
}

impl DecisionRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Total over every `(tone, confidence, out_of_scope, pressure)`.
    ///
    /// `pressure` only matters for Unknown: an Unknown utterance under high
    /// pressure may still earn a suggestion, never a repair.
    pub fn route(
        &self,
        tone: ToneType,
        confidence: CalibratedConfidence,
        out_of_scope: bool,
        pressure: f64,
    ) -> Route {
        let c = confidence.value();
        let clears = |threshold: f64| c >= threshold + self.config.boundary_band;

        if out_of_scope {
            return Route::new(Mode::NoOp, DecisionState::Block, RouteReason::OutOfScope);
        }

        if tone == ToneType::Unknown {
            let high_pressure = pressure >= self.config.unknown_pressure_floor;
            return if high_pressure && clears(self.config.suggest_threshold) {
                Route::new(
                    Mode::Suggest,
                    DecisionState::Guide,
                    RouteReason::UnknownHighPressure,
                )
            } else {
                Route::new(
                    Mode::NoOp,
                    DecisionState::Allow,
                    RouteReason::UnknownLowPressure,
                )
            };
        }

        if clears(self.config.repair_threshold) {
            Route::new(Mode::Repair, DecisionState::Guide, RouteReason::RepairThreshold)
        } else if clears(self.config.suggest_threshold) {
            Route::new(Mode::Suggest, DecisionState::Guide, RouteReason::SuggestThreshold)
        } else {
            Route::new(Mode::NoOp, DecisionState::Allow, RouteReason::BelowSuggest)
        }
    }
}

/// A derived mode disagreed with the router and was overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruthCorrection {
    pub observed: Mode,
    pub corrected_to: Mode,
    pub decision_state: DecisionState,
}

/// One-time synchronous fix-up applied before a response is finalized.
/// The router's route always wins.
pub fn reconcile_mode(route: &Route, observed: Mode) -> Option<TruthCorrection> {
    if observed == route.mode {
        return None;
    }
    Some(TruthCorrection {
        observed,
        corrected_to: route.mode,
        decision_state: route.decision_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> DecisionRouter {
        DecisionRouter::new(RouterConfig::default())
    }

    fn conf(v: f64) -> CalibratedConfidence {
        CalibratedConfidence::new(v)
    }

    #[test]
    fn out_of_scope_blocks_regardless_of_confidence() {
        for tone in ToneType::ALL {
            for c in [0.0, 0.3, 0.55, 1.0] {
                let route = router().route(tone, conf(c), true, 0.0);
                assert_eq!(route.decision_state, DecisionState::Block);
                assert_eq!(route.mode, Mode::NoOp);
            }
        }
    }

    #[test]
    fn thresholds_select_mode() {
        let r = router();
        assert_eq!(r.route(ToneType::Sharp, conf(0.55), false, 0.0).mode, Mode::Repair);
        assert_eq!(r.route(ToneType::Sharp, conf(0.549), false, 0.0).mode, Mode::Suggest);
        assert_eq!(r.route(ToneType::Sharp, conf(0.30), false, 0.0).mode, Mode::Suggest);
        let low = r.route(ToneType::Sharp, conf(0.299), false, 0.0);
        assert_eq!(low.mode, Mode::NoOp);
        assert_eq!(low.decision_state, DecisionState::Allow);
    }

    #[test]
    fn unknown_never_repairs() {
        let r = router();
        let calm = r.route(ToneType::Unknown, conf(0.99), false, 0.1);
        assert_eq!(calm.mode, Mode::NoOp);
        assert_eq!(calm.decision_state, DecisionState::Allow);
        let pressured = r.route(ToneType::Unknown, conf(0.99), false, 0.8);
        assert_eq!(pressured.mode, Mode::Suggest);
        assert_eq!(pressured.decision_state, DecisionState::Guide);
    }

    #[test]
    fn router_is_total_and_consistent() {
        let r = router();
        for tone in ToneType::ALL {
            for step in 0..=1000 {
                let c = conf(step as f64 / 1000.0);
                for oos in [false, true] {
                    for pressure in [0.0, 0.49, 0.5, 1.0] {
                        let route = r.route(tone, c, oos, pressure);
                        match route.decision_state {
                            DecisionState::Allow | DecisionState::Block => {
                                assert_eq!(route.mode, Mode::NoOp)
                            }
                            DecisionState::Guide => assert_ne!(route.mode, Mode::NoOp),
                        }
                        if route.mode == Mode::Repair {
                            assert_ne!(tone, ToneType::Unknown);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn boundary_band_requires_clearance() {
        let r = DecisionRouter::new(RouterConfig {
            boundary_band: 0.02,
            ..RouterConfig::default()
        });
        assert_eq!(r.route(ToneType::Cold, conf(0.56), false, 0.0).mode, Mode::Suggest);
        assert_eq!(r.route(ToneType::Cold, conf(0.58), false, 0.0).mode, Mode::Repair);
    }

    #[test]
    fn reconcile_reports_and_prefers_router() {
        let route = router().route(ToneType::Blur, conf(0.4), false, 0.0);
        assert_eq!(reconcile_mode(&route, Mode::Suggest), None);
        let fix = reconcile_mode(&route, Mode::Repair).expect("mismatch is corrected");
        assert_eq!(fix.corrected_to, Mode::Suggest);
        assert_eq!(fix.observed, Mode::Repair);
        assert_eq!(fix.decision_state, DecisionState::Guide);
    }
}
