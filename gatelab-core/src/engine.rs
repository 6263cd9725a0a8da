//! Policy engine: composes hard gates, scores and guard outcomes into one decision.
//!
//! `apply` is pure. A failing gate or guard is data in the returned
//! [`EvaluationDecision`]; only structural problems with the inputs (a mode
//! flag the caller's scores contradict, a gate naming a metric the bag lacks)
//! are errors.
//!
//! Guard outcomes are passed in as an explicit [`GuardReport`] rather than
//! recomputed here, because the cliff baseline is caller-supplied evidence the
//! engine cannot derive from `RawMetrics` alone.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::metrics::keys;
use crate::domain::{MetricsBag, RawMetrics};
use crate::gates::{self, GateEvaluationError, GateResult};
use crate::governance::GovernanceDecision;
use crate::policy::{GateOp, PolicyDocument};
use crate::scoring::guards::CLIFF_DROP_METRIC;
use crate::scoring::{DerivedScores, GuardReport};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Gate(#[from] GateEvaluationError),
    #[error("policy `{policy}` enables scoring guards but derived scores carry no robustness_factor")]
    MissingRobustnessFactor { policy: String },
    #[error("policy `{policy}` enables scoring guards but no guard report was supplied")]
    MissingGuardReport { policy: String },
    #[error("policy `{policy}` disables scoring guards but guard output was supplied")]
    UnexpectedGuardOutput { policy: String },
    #[error("robustness_factor {derived} does not match guard report {report}")]
    RobustnessMismatch { derived: f64, report: f64 },
    #[error("derived `{field}` is not finite ({value})")]
    NonFiniteScore { field: &'static str, value: f64 },
}

/// Binary admission outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Admit,
    Reject,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admit => "ADMIT",
            Self::Reject => "REJECT",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Everything the engine concluded for one candidate under one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDecision {
    pub policy_name: String,
    /// Hard gate results, in document order.
    pub gates: Vec<GateResult>,
    pub edge_gate: GateResult,
    pub cliff_gate: GateResult,
    /// AND of all hard gate results (disabled gates count as passed).
    pub compliance_passed: bool,
    /// `true` when guards ran and both passed, or when guards are disabled.
    pub guards_passed: bool,
    pub policy_enforced: bool,
    pub notes: Vec<String>,
    pub final_score: f64,
}

impl EvaluationDecision {
    pub fn verdict(&self) -> Verdict {
        if self.compliance_passed || !self.policy_enforced {
            Verdict::Admit
        } else {
            Verdict::Reject
        }
    }

    /// KEEP when everything passes, FREEZE when only a guard failed, DROP on a hard gate failure.
    pub fn suggested_governance(&self) -> GovernanceDecision {
        match (self.compliance_passed, self.guards_passed) {
            (true, true) => GovernanceDecision::Keep,
            (true, false) => GovernanceDecision::Freeze,
            (false, _) => GovernanceDecision::Drop,
        }
    }

    pub fn failed_gates(&self) -> impl Iterator<Item = &GateResult> {
        self.gates.iter().filter(|g| !g.passed)
    }
}

/// Stateless orchestrator; the only setting is whether failures block admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEngine {
    enforce: bool,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::enforcing()
    }
}

impl PolicyEngine {
    pub fn new(enforce: bool) -> Self {
        Self { enforce }
    }

    pub fn enforcing() -> Self {
        Self::new(true)
    }

    /// Failures are recorded but never reject.
    pub fn advisory() -> Self {
        Self::new(false)
    }

    pub fn is_enforcing(&self) -> bool {
        self.enforce
    }

    /// Evaluate one candidate.
    ///
    /// `guards` must be present exactly when the policy enables scoring guards,
    /// and its robustness factor must be the one already folded into `derived`.
    pub fn apply(
        &self,
        policy: &PolicyDocument,
        raw: &RawMetrics,
        derived: &DerivedScores,
        guards: Option<&GuardReport>,
    ) -> Result<EvaluationDecision, EngineError> {
        check_modes(policy, derived, guards)?;

        let bag = MetricsBag::build(raw, derived);
        let gate_results = gates::evaluate(&policy.gates, &bag)?;
        let compliance_passed = gates::all_enabled_passed(&gate_results);

        let (edge_gate, cliff_gate, guard_notes) = match guards {
            Some(report) => (
                report.edge_gate.clone(),
                report.cliff_gate.clone(),
                report.notes.clone(),
            ),
            None => (
                GateResult::skipped(keys::AVG_PROFIT_PER_TRADE, GateOp::Ge, 0.0, "scoring guards disabled"),
                GateResult::skipped(CLIFF_DROP_METRIC, GateOp::Le, 0.0, "scoring guards disabled"),
                Vec::new(),
            ),
        };
        let guards_passed = edge_gate.passed && cliff_gate.passed;

        let prefix = if self.enforce { "" } else { "advisory: " };
        let mut notes: Vec<String> = gate_results
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.passed)
            .map(|(i, g)| format!("{prefix}gate #{i} failed: {}", g.note))
            .collect();
        notes.extend(guard_notes);
        notes.push(match derived.robustness_factor {
            Some(factor) => format!(
                "final_score={:.6} (score_net_mdd={:.6} × trade_multiplier={:.6} × robustness_factor={:.4})",
                derived.final_score, derived.score_net_mdd, derived.trade_multiplier, factor
            ),
            None => format!(
                "final_score={:.6} (score_net_mdd={:.6} × trade_multiplier={:.6})",
                derived.final_score, derived.score_net_mdd, derived.trade_multiplier
            ),
        });

        let decision = EvaluationDecision {
            policy_name: policy.name.clone(),
            gates: gate_results,
            edge_gate,
            cliff_gate,
            compliance_passed,
            guards_passed,
            policy_enforced: self.enforce,
            notes,
            final_score: derived.final_score,
        };

        if !decision.compliance_passed {
            warn!(
                policy = %policy.name,
                failed = decision.failed_gates().count(),
                enforced = self.enforce,
                "hard gates failed"
            );
        }
        debug!(
            policy = %policy.name,
            verdict = %decision.verdict(),
            suggested = %decision.suggested_governance(),
            final_score = decision.final_score,
            "policy applied"
        );
        Ok(decision)
    }
}

/// Evaluate with an enforcing engine.
pub fn apply(
    policy: &PolicyDocument,
    raw: &RawMetrics,
    derived: &DerivedScores,
    guards: Option<&GuardReport>,
) -> Result<EvaluationDecision, EngineError> {
    PolicyEngine::enforcing().apply(policy, raw, derived, guards)
}

fn check_modes(
    policy: &PolicyDocument,
    derived: &DerivedScores,
    guards: Option<&GuardReport>,
) -> Result<(), EngineError> {
    for (field, value) in [
        ("score_net_mdd", derived.score_net_mdd),
        ("trade_multiplier", derived.trade_multiplier),
        ("final_score", derived.final_score),
    ] {
        if !value.is_finite() {
            return Err(EngineError::NonFiniteScore { field, value });
        }
    }

    let policy_name = || policy.name.clone();
    if policy.modes.scoring_guards_enabled {
        let factor = derived
            .robustness_factor
            .ok_or_else(|| EngineError::MissingRobustnessFactor { policy: policy_name() })?;
        let report = guards.ok_or_else(|| EngineError::MissingGuardReport { policy: policy_name() })?;
        if factor.to_bits() != report.robustness_factor.to_bits() {
            return Err(EngineError::RobustnessMismatch {
                derived: factor,
                report: report.robustness_factor,
            });
        }
    } else if derived.robustness_factor.is_some() || guards.is_some() {
        return Err(EngineError::UnexpectedGuardOutput { policy: policy_name() });
    }
    Ok(())
}
