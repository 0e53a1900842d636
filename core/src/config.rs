use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Runtime configuration of the decision pipeline and integrity subsystem.
///
/// Loaded once at startup with [`GovernanceConfig::from_env`] and checked
/// with [`GovernanceConfig::validate`]; a validation failure is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Minimum normalized length in chars. Default: 1.
    pub min_chars: usize,
    /// Maximum raw length in chars. Default: 1000.
    pub max_chars: usize,
    /// Lower router threshold (suggest). Default: 0.30.
    pub suggest_threshold: f64,
    /// Upper router threshold (repair). Default: 0.55.
    pub repair_threshold: f64,
    /// Confidence must clear a threshold by this much. Default: 0.0.
    pub boundary_band: f64,
    /// Pressure at/above which an Unknown utterance still earns guidance. Default: 0.5.
    pub unknown_pressure_floor: f64,
    /// Tone score floor; below it the label is Unknown. Default: 0.35.
    pub tone_floor: f64,
    /// Below this confidence the repair engine never calls the provider. Default: 0.60.
    pub llm_min_confidence: f64,
    /// Provider call timeout. Default: 4000 ms.
    pub repair_timeout_ms: u64,
    /// Root of the usage log, summaries and checkpoints. Default: `./data`.
    pub data_dir: PathBuf,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            min_chars: 1,
            max_chars: 1000,
            suggest_threshold: 0.30,
            repair_threshold: 0.55,
            boundary_band: 0.0,
            unknown_pressure_floor: 0.5,
            tone_floor: 0.35,
            llm_min_confidence: 0.60,
            repair_timeout_ms: 4000,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl GovernanceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Unparseable values fall back
    /// to the default with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            min_chars: parse_or(&lookup, "CONTINUUM_MIN_CHARS", defaults.min_chars),
            max_chars: parse_or(&lookup, "CONTINUUM_MAX_CHARS", defaults.max_chars),
            suggest_threshold: parse_or(
                &lookup,
                "CONTINUUM_SUGGEST_THRESHOLD",
                defaults.suggest_threshold,
            ),
            repair_threshold: parse_or(
                &lookup,
                "CONTINUUM_REPAIR_THRESHOLD",
                defaults.repair_threshold,
            ),
            boundary_band: parse_or(&lookup, "CONTINUUM_BOUNDARY_BAND", defaults.boundary_band),
            unknown_pressure_floor: parse_or(
                &lookup,
                "CONTINUUM_UNKNOWN_PRESSURE_FLOOR",
                defaults.unknown_pressure_floor,
            ),
            tone_floor: parse_or(&lookup, "CONTINUUM_TONE_FLOOR", defaults.tone_floor),
            llm_min_confidence: parse_or(
                &lookup,
                "CONTINUUM_LLM_MIN_CONFIDENCE",
                defaults.llm_min_confidence,
            ),
            repair_timeout_ms: parse_or(
                &lookup,
                "CONTINUUM_REPAIR_TIMEOUT_MS",
                defaults.repair_timeout_ms,
            ),
            data_dir: lookup("CONTINUUM_DATA_DIR")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_chars < 1 || self.min_chars > self.max_chars {
            return Err(ConfigError::LengthBounds {
                min: self.min_chars,
                max: self.max_chars,
            });
        }
        let thresholds_ok = self.suggest_threshold.is_finite()
            && self.repair_threshold.is_finite()
            && 0.0 <= self.suggest_threshold
            && self.suggest_threshold <= self.repair_threshold
            && self.repair_threshold <= 1.0;
        if !thresholds_ok {
            return Err(ConfigError::Thresholds {
                suggest: self.suggest_threshold,
                repair: self.repair_threshold,
            });
        }
        check_range("boundary_band", self.boundary_band, 0.0, 0.1)?;
        check_range(
            "unknown_pressure_floor",
            self.unknown_pressure_floor,
            0.0,
            1.0,
        )?;
        if !(self.tone_floor > 0.0 && self.tone_floor <= 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "tone_floor",
                value: self.tone_floor,
                min: 0.0,
                max: 1.0,
            });
        }
        check_range("llm_min_confidence", self.llm_min_confidence, 0.0, 1.0)?;
        if self.repair_timeout_ms == 0 {
            return Err(ConfigError::RepairTimeout);
        }
        Ok(())
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(variable = name, "unparseable config value; using default");
                default
            }
        },
    }
}
