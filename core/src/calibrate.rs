//! Margin + rhythm → one calibrated scalar in [0, 1].
//!
//! `confidence = m / (m + HALF_MARGIN) * (BASE_WEIGHT + PRESSURE_WEIGHT * pressure)`,
//! rounded to [`RESOLUTION`]. The first factor is strictly increasing in the
//! margin and the second is positive and independent of it, so confidence is
//! monotonic non-decreasing in margin for a fixed rhythm profile. Rounding
//! to a fixed grid keeps byte-identical inputs on the same grid point and
//! cannot reverse the order of two margins.

use serde::Serialize;
use utoipa::ToSchema;

use crate::classify::ClassificationResult;
use crate::rhythm::RhythmProfile;

/// Margin at which the margin factor reaches 0.5.
const HALF_MARGIN: f64 = 0.5;
const BASE_WEIGHT: f64 = 0.85;
const PRESSURE_WEIGHT: f64 = 0.15;
/// Grid steps per unit of the published confidence.
const GRID: f64 = 1000.0;
/// Grid step of the published confidence.
pub const RESOLUTION: f64 = 1.0 / GRID;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, ToSchema)]
#[serde(transparent)]
pub struct CalibratedConfidence(f64);

impl CalibratedConfidence {
    /// Clamp an arbitrary value onto the calibrated grid.
    pub fn new(value: f64) -> Self {
        if !value.is_finite() {
            return Self(0.0);
        }
        // Dividing the integer grid index yields the same double as the decimal
        // literal, so 0.55 here compares equal to a configured 0.55.
        let snapped = (value.clamp(0.0, 1.0) * GRID).round() / GRID;
        Self(snapped.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

pub fn calibrate(result: &ClassificationResult, profile: &RhythmProfile) -> CalibratedConfidence {
    calibrate_parts(result.margin, profile.pressure)
}

pub fn calibrate_parts(margin: f64, pressure: f64) -> CalibratedConfidence {
    let margin = if margin.is_nan() { 0.0 } else { margin.max(0.0) };
    let pressure = if pressure.is_finite() {
        pressure.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let margin_factor = if margin.is_infinite() {
        1.0
    } else {
        margin / (margin + HALF_MARGIN)
    };
    CalibratedConfidence::new(margin_factor * (BASE_WEIGHT + PRESSURE_WEIGHT * pressure))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_margin_is_zero_confidence() {
        assert_eq!(calibrate_parts(0.0, 1.0).value(), 0.0);
    }

    #[test]
    fn monotonic_in_margin_for_fixed_pressure() {
        for pressure in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let mut previous = 0.0;
            for step in 0..=400 {
                let margin = step as f64 * 0.01;
                let value = calibrate_parts(margin, pressure).value();
                assert!(
                    value >= previous,
                    "confidence fell at margin {margin} pressure {pressure}"
                );
                previous = value;
            }
        }
    }

    #[test]
    fn always_within_unit_interval() {
        for margin in [0.0, 0.001, 1.0, 10.0, 1e9, f64::INFINITY, f64::NAN, -3.0] {
            for pressure in [-1.0, 0.0, 0.5, 1.0, 4.0, f64::NAN] {
                let value = calibrate_parts(margin, pressure).value();
                assert!((0.0..=1.0).contains(&value), "{margin} {pressure} -> {value}");
            }
        }
    }

    #[test]
    fn pressure_raises_confidence() {
        assert!(calibrate_parts(1.0, 1.0).value() > calibrate_parts(1.0, 0.0).value());
    }

    #[test]
    fn published_values_sit_on_the_grid() {
        let value = calibrate_parts(0.731, 0.17).value();
        let steps = value / RESOLUTION;
        assert!((steps - steps.round()).abs() < 1e-6);
    }

    #[test]
    fn new_clamps_out_of_range_values() {
        assert_eq!(CalibratedConfidence::new(1.7).value(), 1.0);
        assert_eq!(CalibratedConfidence::new(-0.2).value(), 0.0);
        assert_eq!(CalibratedConfidence::new(f64::NAN).value(), 0.0);
    }
}
