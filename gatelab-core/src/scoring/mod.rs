//! Scoring engine: trade-count-aware scores derived from raw metrics.
//!
//! ```text
//! score_net_mdd    = net_profit / |max_drawdown|
//! trade_multiplier = trades ^ 0.25
//! final_score      = score_net_mdd × trade_multiplier × robustness_factor
//! ```
//!
//! The quarter-power multiplier is sub-linear: a lucky two-trade run
//! with a great edge ratio cannot outrank a steady two-hundred-trade run.
//! Everything here is pure.

pub mod guards;
pub mod stats;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RawMetrics;

pub use guards::{
    apply_guards, cliff_gate, min_edge_gate, CliffBaseline, GuardError, GuardReport,
    ScoringGuardConfig,
};
pub use stats::{
    compute_robust_stats, detect_bimodality_cluster, BimodalityCheck, BimodalityConfig,
    RobustStats, Severity,
};

/// Exponent of the trade-count dampening power law.
pub const TRADE_MULTIPLIER_EXPONENT: f64 = 0.25;

/// A score whose defining formula has no value for the given inputs.
///
/// Never coerced to 0 or ±∞: a zero-drawdown result is either too little data
/// or an anomaly, and must be surfaced.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("metric `{metric}` is undefined: {reason}")]
pub struct MetricUndefinedError {
    pub metric: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error(transparent)]
    MetricUndefined(#[from] MetricUndefinedError),
    #[error("raw metric `{field}` is not finite ({value})")]
    NonFiniteInput { field: &'static str, value: f64 },
}

/// Scores derived from one `RawMetrics`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedScores {
    pub score_net_mdd: f64,
    pub trade_multiplier: f64,
    /// Set once scoring guards have run; `None` means guards did not run.
    pub robustness_factor: Option<f64>,
    pub final_score: f64,
}

impl DerivedScores {
    /// Score before any robustness adjustment.
    pub fn base_score(&self) -> f64 {
        self.score_net_mdd * self.trade_multiplier
    }

    /// Attach a robustness factor and recompute `final_score`.
    pub fn with_robustness(self, robustness_factor: f64) -> Self {
        Self {
            robustness_factor: Some(robustness_factor),
            final_score: self.base_score() * robustness_factor,
            ..self
        }
    }
}

/// `net_profit / |max_drawdown|`.
pub fn score_net_mdd(net_profit: f64, max_drawdown: f64) -> Result<f64, MetricUndefinedError> {
    if max_drawdown == 0.0 {
        return Err(MetricUndefinedError {
            metric: "score_net_mdd",
            reason: "max_drawdown is zero".into(),
        });
    }
    Ok(net_profit / max_drawdown.abs())
}

/// `trades ^ 0.25`.
pub fn trade_multiplier(trades: u64) -> f64 {
    (trades as f64).powf(TRADE_MULTIPLIER_EXPONENT)
}

/// Derive scores from raw metrics. `robustness_factor` is left unset.
pub fn score(raw: &RawMetrics) -> Result<DerivedScores, ScoringError> {
    if !raw.net_profit.is_finite() {
        return Err(ScoringError::NonFiniteInput {
            field: "net_profit",
            value: raw.net_profit,
        });
    }
    if !raw.max_drawdown.is_finite() {
        return Err(ScoringError::NonFiniteInput {
            field: "max_drawdown",
            value: raw.max_drawdown,
        });
    }

    let score_net_mdd = score_net_mdd(raw.net_profit, raw.max_drawdown)?;
    let trade_multiplier = trade_multiplier(raw.trades);

    Ok(DerivedScores {
        score_net_mdd,
        trade_multiplier,
        robustness_factor: None,
        final_score: score_net_mdd * trade_multiplier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_scores() {
        let derived = score(&RawMetrics::new(1000.0, 100.0, 50)).unwrap();
        assert_eq!(derived.score_net_mdd, 10.0);
        assert!((derived.trade_multiplier - 2.659).abs() < 1e-3);
        assert!((derived.final_score - 26.591).abs() < 1e-3);
        assert_eq!(derived.robustness_factor, None);
    }

    #[test]
    fn drawdown_sign_does_not_matter() {
        let pos = score(&RawMetrics::new(500.0, 250.0, 16)).unwrap();
        let neg = score(&RawMetrics::new(500.0, -250.0, 16)).unwrap();
        assert_eq!(pos, neg);
        assert_eq!(pos.trade_multiplier, 2.0);
    }

    #[test]
    fn zero_drawdown_is_undefined() {
        let err = score(&RawMetrics::new(1000.0, 0.0, 50)).unwrap_err();
        assert!(matches!(err, ScoringError::MetricUndefined(ref e) if e.metric == "score_net_mdd"));
    }

    #[test]
    fn negative_zero_drawdown_is_undefined() {
        assert!(score(&RawMetrics::new(1000.0, -0.0, 50)).is_err());
    }

    #[test]
    fn non_finite_inputs_are_rejected() {
        assert!(matches!(
            score(&RawMetrics::new(f64::NAN, 1.0, 5)),
            Err(ScoringError::NonFiniteInput { field: "net_profit", .. })
        ));
        assert!(matches!(
            score(&RawMetrics::new(1.0, f64::INFINITY, 5)),
            Err(ScoringError::NonFiniteInput { field: "max_drawdown", .. })
        ));
    }

    #[test]
    fn few_lucky_trades_do_not_outscore_many_steady_ones() {
        // Same edge ratio per unit drawdown, very different evidence.
        let lucky = score(&RawMetrics::new(400.0, 20.0, 2)).unwrap();
        let steady = score(&RawMetrics::new(1500.0, 100.0, 200)).unwrap();
        assert!(lucky.score_net_mdd > steady.score_net_mdd);
        assert!(steady.final_score > lucky.final_score);
        assert!(steady.trade_multiplier > 3.0 * lucky.trade_multiplier);
    }

    #[test]
    fn zero_trades_zeroes_the_multiplier() {
        let derived = score(&RawMetrics::new(10.0, 5.0, 0)).unwrap();
        assert_eq!(derived.trade_multiplier, 0.0);
        assert_eq!(derived.final_score, 0.0);
    }

    #[test]
    fn robustness_factor_scales_final_score() {
        let derived = score(&RawMetrics::new(1000.0, 100.0, 16)).unwrap();
        let adjusted = derived.with_robustness(0.5);
        assert_eq!(adjusted.robustness_factor, Some(0.5));
        assert_eq!(adjusted.final_score, 10.0);
        assert_eq!(adjusted.base_score(), derived.base_score());
    }

    #[test]
    fn scoring_is_bit_identical_across_calls() {
        let raw = RawMetrics::new(1234.5678, 321.0, 77);
        let a = score(&raw).unwrap();
        let b = score(&raw).unwrap();
        assert_eq!(a.final_score.to_bits(), b.final_score.to_bits());
        assert_eq!(a.trade_multiplier.to_bits(), b.trade_multiplier.to_bits());
    }
}
