//! GateLab Core: policy-driven robustness gating for backtest candidates.
//!
//! This crate turns raw backtest metrics into a reproducible verdict:
//! - Sandboxed policy registry, schema validation and `sha256:` fingerprints
//! - Hard gate evaluator (every gate, document order, no short-circuit)
//! - Trade-count-aware scoring and robustness guards (min-edge, cliff, bimodality)
//! - Plateau detector that prefers stable parameter regions over isolated spikes
//! - Mode B anchor calibration and signal-density screening
//! - Policy engine and the governance lifecycle state machine
//!
//! Everything here is pure apart from reading policy files and candidate pools.

pub mod anchors;
pub mod canonical;
pub mod domain;
pub mod engine;
pub mod gates;
pub mod governance;
pub mod plateau;
pub mod policy;
pub mod scoring;

pub use anchors::{
    calibrate, compute_signal_rate, compute_signal_rate_above, select_mode_b_anchors, AnchorError, AnchorPoint, ModeBConfig,
    SignalDensityFilter, SignalScreen, TsrCalibrationConfig,
};
pub use domain::{CandidateId, JobId, MetricsBag, RawMetrics};
pub use engine::{apply, EngineError, EvaluationDecision, PolicyEngine, Verdict};
pub use gates::{evaluate, GateEvaluationError, GateResult};
pub use governance::{
    replay, transition, EvidenceRef, GovernanceDecision, GovernanceItem, LifecycleState,
};
pub use plateau::{
    identify_plateau, identify_plateau_with, PlateauCandidate, PlateauConfig, PlateauError,
    PlateauReport,
};
pub use policy::{
    LoadedPolicy, PolicyDocument, PolicyError, PolicyRegistry, PolicySelectorError,
    PolicyValidationError,
};
pub use scoring::{
    apply_guards, score, CliffBaseline, DerivedScores, GuardReport, MetricUndefinedError,
    ScoringError, ScoringGuardConfig,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: value types handed across threads are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Policy
        require_send::<PolicyRegistry>();
        require_sync::<PolicyRegistry>();
        require_send::<LoadedPolicy>();
        require_sync::<LoadedPolicy>();

        // Evaluation
        require_send::<RawMetrics>();
        require_sync::<RawMetrics>();
        require_send::<DerivedScores>();
        require_sync::<DerivedScores>();
        require_send::<GuardReport>();
        require_sync::<GuardReport>();
        require_send::<EvaluationDecision>();
        require_sync::<EvaluationDecision>();
        require_send::<PolicyEngine>();
        require_sync::<PolicyEngine>();

        // Plateau / Mode B
        require_send::<PlateauCandidate>();
        require_sync::<PlateauCandidate>();
        require_send::<PlateauReport>();
        require_sync::<PlateauReport>();
        require_send::<SignalDensityFilter>();
        require_sync::<SignalDensityFilter>();

        // Governance
        require_send::<GovernanceItem>();
        require_sync::<GovernanceItem>();

        // Errors
        require_send::<PolicyError>();
        require_sync::<PolicyError>();
        require_send::<EngineError>();
        require_sync::<EngineError>();
    }
}
