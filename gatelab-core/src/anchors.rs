//! Mode B anchor calibration and signal-density screening.
//!
//! A reference signal series (one value per bar, typically the raw strength of
//! the entry indicator) is turned into quantile anchors: thresholds whose
//! resulting signal rate is known. Anchors whose rate falls inside the
//! admissible density band are kept; a reference series with no admissible
//! anchor is structurally degenerate and rejected.
//!
//! Candidates are then screened before scoring: a candidate bar counts as a
//! signal only when its magnitude clears the most permissive admissible anchor,
//! and the resulting rate must land in the band. A parameter set that almost
//! never (or almost always) fires at the calibrated scale never reaches the
//! scoring engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::gates::GateResult;
use crate::policy::GateOp;
use crate::scoring::stats::{percentile_sorted, sorted_copy};

pub const SIGNAL_RATE_METRIC: &str = "signal_rate";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnchorError {
    #[error("reference series is empty")]
    EmptySeries,
    #[error("reference series value #{index} is not finite")]
    NonFiniteSeries { index: usize },
    #[error("anchor quantile {0} is outside (0, 1)")]
    QuantileOutOfRange(f64),
    #[error("anchor quantile {0} is listed twice")]
    DuplicateQuantile(f64),
    #[error("invalid signal-rate band [{min}, {max}]")]
    InvalidBand { min: f64, max: f64 },
    #[error("no anchor has a signal rate inside [{min}, {max}]")]
    NoAdmissibleAnchor { min: f64, max: f64 },
}

/// Mode B settings that do not depend on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModeBConfig {
    pub anchor_quantiles: Vec<f64>,
    pub min_signal_rate: f64,
    pub max_signal_rate: f64,
}

impl Default for ModeBConfig {
    fn default() -> Self {
        Self {
            anchor_quantiles: vec![0.25, 0.5, 0.75, 0.9],
            min_signal_rate: 0.02,
            max_signal_rate: 0.60,
        }
    }
}

impl ModeBConfig {
    pub fn validate(&self) -> Result<(), AnchorError> {
        let (min, max) = (self.min_signal_rate, self.max_signal_rate);
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
            return Err(AnchorError::InvalidBand { min, max });
        }
        for (i, q) in self.anchor_quantiles.iter().enumerate() {
            if !(*q > 0.0 && *q < 1.0) {
                return Err(AnchorError::QuantileOutOfRange(*q));
            }
            if self.anchor_quantiles[..i].contains(q) {
                return Err(AnchorError::DuplicateQuantile(*q));
            }
        }
        Ok(())
    }

    /// Bind these settings to a reference series.
    pub fn calibration(&self, reference_series: Vec<f64>) -> TsrCalibrationConfig {
        TsrCalibrationConfig {
            reference_series,
            settings: self.clone(),
        }
    }
}

/// Input to [`calibrate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsrCalibrationConfig {
    pub reference_series: Vec<f64>,
    pub settings: ModeBConfig,
}

/// One quantile threshold on the reference series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPoint {
    pub quantile: f64,
    /// Threshold on `|signal|`.
    pub value: f64,
    /// Share of reference bars with `|signal| >= value`.
    pub signal_rate: f64,
}

/// Compute one anchor per configured quantile, in configured order.
pub fn calibrate(config: &TsrCalibrationConfig) -> Result<Vec<AnchorPoint>, AnchorError> {
    config.settings.validate()?;
    let series = &config.reference_series;
    if series.is_empty() {
        return Err(AnchorError::EmptySeries);
    }
    if let Some(index) = series.iter().position(|v| !v.is_finite()) {
        return Err(AnchorError::NonFiniteSeries { index });
    }

    let magnitudes: Vec<f64> = series.iter().map(|v| v.abs()).collect();
    let sorted = sorted_copy(&magnitudes);
    let n = sorted.len() as f64;

    Ok(config
        .settings
        .anchor_quantiles
        .iter()
        .map(|&quantile| {
            let value = percentile_sorted(&sorted, quantile);
            let above = sorted.iter().filter(|&&m| m >= value).count();
            AnchorPoint {
                quantile,
                value,
                signal_rate: above as f64 / n,
            }
        })
        .collect())
}

/// Keep anchors whose signal rate lies inside the admissible band.
pub fn select_mode_b_anchors(
    anchors: &[AnchorPoint],
    settings: &ModeBConfig,
) -> Result<Vec<AnchorPoint>, AnchorError> {
    settings.validate()?;
    let (min, max) = (settings.min_signal_rate, settings.max_signal_rate);
    let selected: Vec<AnchorPoint> = anchors
        .iter()
        .filter(|a| a.signal_rate >= min && a.signal_rate <= max)
        .copied()
        .collect();
    if selected.is_empty() {
        return Err(AnchorError::NoAdmissibleAnchor { min, max });
    }
    debug!(
        calibrated = anchors.len(),
        selected = selected.len(),
        "mode B anchors selected"
    );
    Ok(selected)
}

/// Share of bars carrying an actionable (finite, non-zero) signal. 0 when empty.
pub fn compute_signal_rate(series: &[f64]) -> f64 {
    compute_signal_rate_above(series, 0.0)
}

/// Share of bars whose finite, non-zero magnitude reaches `threshold`. 0 when empty.
pub fn compute_signal_rate_above(series: &[f64], threshold: f64) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let active = series
        .iter()
        .filter(|v| v.is_finite() && **v != 0.0 && v.abs() >= threshold)
        .count();
    active as f64 / series.len() as f64
}

/// Outcome of screening one candidate's signal series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalScreen {
    /// Magnitude a bar must reach to count as a signal.
    pub threshold: f64,
    pub signal_rate: f64,
    pub lower: GateResult,
    pub upper: GateResult,
    pub anchors: Vec<AnchorPoint>,
    pub passed: bool,
}

/// Calibrated density band a candidate must fall into.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDensityFilter {
    settings: ModeBConfig,
    anchors: Vec<AnchorPoint>,
}

impl SignalDensityFilter {
    /// Calibrate against the reference and keep admissible anchors.
    pub fn calibrate(config: &TsrCalibrationConfig) -> Result<Self, AnchorError> {
        let anchors = select_mode_b_anchors(&calibrate(config)?, &config.settings)?;
        Ok(Self {
            settings: config.settings.clone(),
            anchors,
        })
    }

    pub fn anchors(&self) -> &[AnchorPoint] {
        &self.anchors
    }

    /// Lowest admissible anchor value.
    pub fn threshold(&self) -> f64 {
        self.anchors
            .iter()
            .map(|a| a.value)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn screen(&self, candidate_signals: &[f64]) -> SignalScreen {
        let threshold = self.threshold();
        let signal_rate = compute_signal_rate_above(candidate_signals, threshold);
        let lower = GateResult::check(
            SIGNAL_RATE_METRIC,
            signal_rate,
            GateOp::Ge,
            self.settings.min_signal_rate,
            "candidate rarely signals",
        );
        let upper = GateResult::check(
            SIGNAL_RATE_METRIC,
            signal_rate,
            GateOp::Le,
            self.settings.max_signal_rate,
            "candidate signals on almost every bar",
        );
        let passed = lower.passed && upper.passed;
        debug!(threshold, signal_rate, passed, "mode B signal screen");
        SignalScreen {
            threshold,
            signal_rate,
            lower,
            upper,
            anchors: self.anchors.clone(),
            passed,
        }
    }
}
