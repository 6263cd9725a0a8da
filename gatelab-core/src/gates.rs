//! Hard gate evaluator.
//!
//! Every gate in a policy is evaluated, in document order, even after one has
//! failed: audit artifacts report the full gate picture. A failed gate is an
//! ordinary `GateResult { passed: false }`; only configuration defects (a gate
//! naming a metric the bag does not carry) are errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::MetricsBag;
use crate::policy::{GateOp, GateSpec};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GateEvaluationError {
    #[error("gate #{index} references metric `{metric}` which is absent from the metrics bag")]
    MissingMetric { index: usize, metric: String },
    #[error("gate #{index} metric `{metric}` is not finite ({value})")]
    NonFiniteMetric {
        index: usize,
        metric: String,
        value: f64,
    },
}

/// Outcome of a single gate check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub metric: String,
    /// `None` when the gate was disabled or had nothing to observe.
    pub observed_value: Option<f64>,
    pub threshold: f64,
    pub op: GateOp,
    pub passed: bool,
    pub note: String,
}

impl GateResult {
    /// A check that did not run and therefore does not block.
    pub fn skipped(metric: &str, op: GateOp, threshold: f64, note: impl Into<String>) -> Self {
        Self {
            metric: metric.to_string(),
            observed_value: None,
            threshold,
            op,
            passed: true,
            note: note.into(),
        }
    }

    /// Compare an observed value against a threshold.
    pub fn check(
        metric: &str,
        observed: f64,
        op: GateOp,
        threshold: f64,
        fail_note: &str,
    ) -> Self {
        let passed = op.compare(observed, threshold);
        let note = if passed {
            format!("{metric} {observed} {op} {threshold}")
        } else {
            format!("{fail_note} ({metric} = {observed}, required {op} {threshold})")
        };
        Self {
            metric: metric.to_string(),
            observed_value: Some(observed),
            threshold,
            op,
            passed,
            note,
        }
    }
}

/// Evaluate one gate.
///
/// Disabled gates pass without reading the bag.
pub fn evaluate_gate(
    index: usize,
    gate: &GateSpec,
    metrics: &MetricsBag,
) -> Result<GateResult, GateEvaluationError> {
    if !gate.enabled {
        return Ok(GateResult::skipped(
            &gate.metric,
            gate.op,
            gate.threshold,
            "gate disabled",
        ));
    }

    let observed = metrics
        .get(&gate.metric)
        .ok_or_else(|| GateEvaluationError::MissingMetric {
            index,
            metric: gate.metric.clone(),
        })?;
    if !observed.is_finite() {
        return Err(GateEvaluationError::NonFiniteMetric {
            index,
            metric: gate.metric.clone(),
            value: observed,
        });
    }

    let result = GateResult::check(&gate.metric, observed, gate.op, gate.threshold, &gate.fail_reason);
    debug!(
        index,
        metric = %gate.metric,
        observed,
        op = %gate.op,
        threshold = gate.threshold,
        passed = result.passed,
        "gate evaluated"
    );
    Ok(result)
}

/// Evaluate every gate, in order, without short-circuiting on failure.
pub fn evaluate(gates: &[GateSpec], metrics: &MetricsBag) -> Result<Vec<GateResult>, GateEvaluationError> {
    gates
        .iter()
        .enumerate()
        .map(|(index, gate)| evaluate_gate(index, gate, metrics))
        .collect()
}

/// Logical AND of every gate that actually ran.
pub fn all_enabled_passed(results: &[GateResult]) -> bool {
    results.iter().all(|r| r.passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(metric: &str, op: GateOp, threshold: f64, enabled: bool) -> GateSpec {
        GateSpec {
            metric: metric.into(),
            op,
            threshold,
            fail_reason: format!("{metric} failed"),
            enabled,
        }
    }

    fn bag() -> MetricsBag {
        [("trades".to_string(), 50.0), ("sharpe".to_string(), 0.4)]
            .into_iter()
            .collect()
    }

    #[test]
    fn evaluates_every_gate_after_a_failure() {
        let gates = vec![
            gate("sharpe", GateOp::Ge, 1.0, true),
            gate("trades", GateOp::Ge, 30.0, true),
            gate("trades", GateOp::Lt, 10.0, true),
        ];
        let results = evaluate(&gates, &bag()).unwrap();
        assert_eq!(results.len(), 3);
        assert!(!results[0].passed);
        assert!(results[1].passed);
        assert!(!results[2].passed);
        assert!(!all_enabled_passed(&results));
    }

    #[test]
    fn results_follow_document_order() {
        let gates = vec![
            gate("trades", GateOp::Ge, 1.0, true),
            gate("sharpe", GateOp::Ge, 0.0, true),
        ];
        let results = evaluate(&gates, &bag()).unwrap();
        assert_eq!(results[0].metric, "trades");
        assert_eq!(results[1].metric, "sharpe");
    }

    #[test]
    fn disabled_gate_passes_without_reading_metrics() {
        let gates = vec![gate("not_in_bag", GateOp::Ge, 1e9, false)];
        let results = evaluate(&gates, &MetricsBag::new()).unwrap();
        assert!(results[0].passed);
        assert_eq!(results[0].observed_value, None);
    }

    #[test]
    fn missing_metric_is_a_configuration_error() {
        let gates = vec![
            gate("trades", GateOp::Ge, 1.0, true),
            gate("profit_factor", GateOp::Ge, 1.0, true),
        ];
        let err = evaluate(&gates, &bag()).unwrap_err();
        assert_eq!(
            err,
            GateEvaluationError::MissingMetric {
                index: 1,
                metric: "profit_factor".into()
            }
        );
    }

    #[test]
    fn failure_note_carries_fail_reason() {
        let results = evaluate(&[gate("sharpe", GateOp::Ge, 1.0, true)], &bag()).unwrap();
        assert!(results[0].note.starts_with("sharpe failed"));
        assert_eq!(results[0].observed_value, Some(0.4));
    }

    #[test]
    fn non_finite_metric_is_an_error() {
        let mut metrics = bag();
        metrics.insert("sharpe", f64::NAN);
        let err = evaluate(&[gate("sharpe", GateOp::Ge, 1.0, true)], &metrics).unwrap_err();
        assert!(matches!(err, GateEvaluationError::NonFiniteMetric { .. }));
    }
}
