//! Scoring guards: robustness checks layered outside the policy's hard gates.
//!
//! - **min-edge**: average profit per trade must clear a floor.
//! - **cliff**: the candidate's score must not tower over its perturbation
//!   baseline (a sharp drop-off around the candidate means it sits on a cliff
//!   edge, not a plateau).
//! - **bimodality**: a split baseline sample is reported as a warning only.
//!
//! The cliff baseline is always supplied by the caller. This module never
//! searches parameter space itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::stats::{
    check_sample, compute_robust_stats, detect_bimodality_cluster, BimodalityCheck,
    BimodalityConfig, RobustStats,
};
use super::DerivedScores;
use crate::domain::metrics::keys;
use crate::domain::RawMetrics;
use crate::gates::GateResult;
use crate::policy::GateOp;

/// Bag key reported by the cliff gate.
pub const CLIFF_DROP_METRIC: &str = "cliff_drop";

const SCORE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    #[error("sample is empty")]
    EmptySample,
    #[error("sample value #{index} is not finite ({value})")]
    NonFiniteSample { index: usize, value: f64 },
    #[error("cliff reference score is not finite ({0})")]
    NonFiniteReference(f64),
    #[error("invalid guard configuration: {0}")]
    InvalidConfig(String),
}

/// Thresholds and penalties for the scoring guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringGuardConfig {
    /// Floor for `net_profit / trades`.
    pub min_edge_per_trade: f64,
    /// Largest tolerated relative drop from candidate score to baseline level.
    pub max_cliff_drop: f64,
    /// Robustness multiplier applied when the min-edge guard fails.
    pub edge_penalty: f64,
    /// Robustness multiplier applied when the cliff guard fails.
    pub cliff_penalty: f64,
    pub bimodality_gap_ratio: f64,
    pub bimodality_min_cluster_fraction: f64,
}

impl Default for ScoringGuardConfig {
    fn default() -> Self {
        let bimodality = BimodalityConfig::default();
        Self {
            min_edge_per_trade: 1.0,
            max_cliff_drop: 0.5,
            edge_penalty: 0.5,
            cliff_penalty: 0.5,
            bimodality_gap_ratio: bimodality.gap_ratio,
            bimodality_min_cluster_fraction: bimodality.min_cluster_fraction,
        }
    }
}

impl ScoringGuardConfig {
    pub fn validate(&self) -> Result<(), GuardError> {
        let finite = [
            ("min_edge_per_trade", self.min_edge_per_trade),
            ("max_cliff_drop", self.max_cliff_drop),
            ("bimodality_gap_ratio", self.bimodality_gap_ratio),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(GuardError::InvalidConfig(format!("{name} must be finite")));
            }
        }
        for (name, value) in [
            ("edge_penalty", self.edge_penalty),
            ("cliff_penalty", self.cliff_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GuardError::InvalidConfig(format!("{name} must be in [0, 1]")));
            }
        }
        if self.max_cliff_drop < 0.0 {
            return Err(GuardError::InvalidConfig("max_cliff_drop must be >= 0".into()));
        }
        if self.bimodality_gap_ratio <= 0.0 {
            return Err(GuardError::InvalidConfig("bimodality_gap_ratio must be > 0".into()));
        }
        if !(0.0..0.5).contains(&self.bimodality_min_cluster_fraction) {
            return Err(GuardError::InvalidConfig(
                "bimodality_min_cluster_fraction must be in [0, 0.5)".into(),
            ));
        }
        Ok(())
    }

    pub fn bimodality(&self) -> BimodalityConfig {
        BimodalityConfig {
            gap_ratio: self.bimodality_gap_ratio,
            min_cluster_fraction: self.bimodality_min_cluster_fraction,
        }
    }
}

/// What the cliff gate compares the candidate against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CliffBaseline {
    /// A single reference score (e.g. the same parameters on a perturbed run).
    Reference { score: f64 },
    /// Scores of perturbed/neighbor parameter sets; the baseline level is their median.
    Neighbors { scores: Vec<f64> },
}

/// Everything the guards concluded for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardReport {
    pub robustness_factor: f64,
    pub edge_gate: GateResult,
    pub cliff_gate: GateResult,
    /// Robust stats of the neighbor baseline, when one was supplied.
    pub baseline_stats: Option<RobustStats>,
    pub bimodality: Option<BimodalityCheck>,
    pub notes: Vec<String>,
}

/// Average profit per trade must reach `min_edge_per_trade`.
pub fn min_edge_gate(raw: &RawMetrics, config: &ScoringGuardConfig) -> GateResult {
    match raw.avg_profit_per_trade() {
        Some(edge) => GateResult::check(
            keys::AVG_PROFIT_PER_TRADE,
            edge,
            GateOp::Ge,
            config.min_edge_per_trade,
            "average edge per trade below floor",
        ),
        None => GateResult {
            metric: keys::AVG_PROFIT_PER_TRADE.to_string(),
            observed_value: None,
            threshold: config.min_edge_per_trade,
            op: GateOp::Ge,
            passed: false,
            note: "no trades: average edge per trade is undefined".into(),
        },
    }
}

/// Relative drop from the candidate's base score to the baseline level must
/// stay within `max_cliff_drop`.
///
/// `drop = (candidate - baseline) / max(|candidate|, ε)`; a baseline at or
/// above the candidate yields a non-positive drop and always passes.
pub fn cliff_gate(
    derived: &DerivedScores,
    baseline: &CliffBaseline,
    config: &ScoringGuardConfig,
) -> Result<(GateResult, Option<RobustStats>), GuardError> {
    let (level, stats) = match baseline {
        CliffBaseline::Reference { score } => {
            if !score.is_finite() {
                return Err(GuardError::NonFiniteReference(*score));
            }
            (*score, None)
        }
        CliffBaseline::Neighbors { scores } => {
            let stats = compute_robust_stats(scores)?;
            (stats.median, Some(stats))
        }
    };

    let candidate = derived.base_score();
    let drop = (candidate - level) / candidate.abs().max(SCORE_EPSILON);
    let gate = GateResult::check(
        CLIFF_DROP_METRIC,
        drop,
        GateOp::Le,
        config.max_cliff_drop,
        "performance cliff around candidate",
    );
    Ok((gate, stats))
}

/// Run every guard and fold the outcomes into a robustness factor.
pub fn apply_guards(
    raw: &RawMetrics,
    derived: &DerivedScores,
    config: &ScoringGuardConfig,
    baseline: &CliffBaseline,
) -> Result<GuardReport, GuardError> {
    config.validate()?;

    let edge_gate = min_edge_gate(raw, config);
    let (cliff_gate, baseline_stats) = cliff_gate(derived, baseline, config)?;

    let bimodality = match baseline {
        CliffBaseline::Neighbors { scores } => {
            check_sample(scores)?;
            Some(detect_bimodality_cluster(scores, &config.bimodality())?)
        }
        CliffBaseline::Reference { .. } => None,
    };

    let mut robustness_factor = 1.0;
    let mut notes = Vec::new();

    if !edge_gate.passed {
        robustness_factor *= config.edge_penalty;
        notes.push(format!("min-edge guard failed: {}", edge_gate.note));
    }
    if !cliff_gate.passed {
        robustness_factor *= config.cliff_penalty;
        notes.push(format!("cliff guard failed: {}", cliff_gate.note));
    }
    if let Some(check) = &bimodality {
        for note in &check.notes {
            if check.is_bimodal {
                notes.push(format!("robustness warning: {note}"));
            }
        }
    }
    notes.push(format!("robustness_factor={robustness_factor:.4}"));

    debug!(
        edge_passed = edge_gate.passed,
        cliff_passed = cliff_gate.passed,
        bimodal = bimodality.as_ref().map(|b| b.is_bimodal).unwrap_or(false),
        robustness_factor,
        "scoring guards applied"
    );

    Ok(GuardReport {
        robustness_factor,
        edge_gate,
        cliff_gate,
        baseline_stats,
        bimodality,
        notes,
    })
}
