//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. Disabled-gate invariance: a disabled gate passes for any metrics bag
//! 2. Exhaustive evaluation: N gates always yield N results
//! 3. Governance absorption and replay from any history
//! 4. Scoring purity and the undefined zero-drawdown score
//! 5. Fingerprint stability under formatting-only edits
//! 6. Plateau selection independent of input order

use proptest::prelude::*;

use gatelab_core::gates::{evaluate, evaluate_gate};
use gatelab_core::governance::{replay, transition, GovernanceDecision, LifecycleState};
use gatelab_core::plateau::{identify_plateau, ParamValue, PlateauCandidate};
use gatelab_core::policy::{GateOp, GateSpec, PolicyDocument, PolicyFormat};
use gatelab_core::scoring::{score, ScoringError};
use gatelab_core::{CandidateId, MetricsBag, RawMetrics};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_op() -> impl Strategy<Value = GateOp> {
    prop::sample::select(GateOp::ALL.to_vec())
}

fn arb_metric_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["trades", "net_profit", "sharpe", "final_score", "absent"])
        .prop_map(str::to_string)
}

fn arb_bag() -> impl Strategy<Value = MetricsBag> {
    prop::collection::btree_map(arb_metric_name(), -1e6..1e6_f64, 0..4)
        .prop_map(|m| m.into_iter().collect())
}

fn arb_gate(enabled: bool) -> impl Strategy<Value = GateSpec> {
    (arb_op(), -1e6..1e6_f64).prop_map(move |(op, threshold)| GateSpec {
        metric: "trades".into(),
        op,
        threshold,
        fail_reason: "trades out of bounds".into(),
        enabled,
    })
}

fn arb_decision() -> impl Strategy<Value = GovernanceDecision> {
    prop::sample::select(GovernanceDecision::ALL.to_vec())
}

fn arb_state() -> impl Strategy<Value = LifecycleState> {
    prop::sample::select(LifecycleState::ALL.to_vec())
}

fn arb_raw() -> impl Strategy<Value = RawMetrics> {
    (-1e6..1e6_f64, 1e-3..1e6_f64, 0u64..100_000)
        .prop_map(|(profit, drawdown, trades)| RawMetrics::new(profit, drawdown, trades))
}

// ── 1. Disabled-gate invariance ──────────────────────────────────────

proptest! {
    #[test]
    fn disabled_gate_always_passes(
        gate in arb_gate(false),
        metric in arb_metric_name(),
        bag in arb_bag(),
    ) {
        let gate = GateSpec { metric, ..gate };
        let result = evaluate_gate(0, &gate, &bag).unwrap();
        prop_assert!(result.passed);
        prop_assert!(result.observed_value.is_none());
    }
}

// ── 2. Exhaustive evaluation ─────────────────────────────────────────

proptest! {
    #[test]
    fn every_gate_yields_a_result(
        gates in prop::collection::vec(arb_gate(true), 1..8),
        trades in 0.0..1e4_f64,
    ) {
        let mut bag = MetricsBag::new();
        bag.insert("trades", trades);
        let mut gates = gates;
        // First gate can never pass.
        gates[0].op = GateOp::Gt;
        gates[0].threshold = 1e9;

        let results = evaluate(&gates, &bag).unwrap();
        prop_assert_eq!(results.len(), gates.len());
        prop_assert!(!results[0].passed);
        for (gate, result) in gates.iter().zip(&results) {
            prop_assert_eq!(result.op, gate.op);
            prop_assert_eq!(result.threshold, gate.threshold);
        }
    }
}

// ── 3. Governance ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn retired_absorbs_every_decision(decision in arb_decision()) {
        prop_assert_eq!(transition(LifecycleState::Retired, decision), LifecycleState::Retired);
    }

    #[test]
    fn drop_always_retires(state in arb_state()) {
        prop_assert_eq!(transition(state, GovernanceDecision::Drop), LifecycleState::Retired);
    }

    #[test]
    fn replay_is_a_left_fold(history in prop::collection::vec(arb_decision(), 0..20)) {
        let mut state = LifecycleState::Incubation;
        for d in &history {
            state = transition(state, *d);
        }
        prop_assert_eq!(replay(history.iter().copied()), state);
        if history.contains(&GovernanceDecision::Drop) {
            prop_assert_eq!(state, LifecycleState::Retired);
        }
    }
}

#[test]
fn transition_table_covers_twelve_pairs() {
    let mut seen = 0;
    for state in LifecycleState::ALL {
        for decision in GovernanceDecision::ALL {
            let _ = transition(state, decision);
            seen += 1;
        }
    }
    assert_eq!(seen, 12);
}

// ── 4. Scoring ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn scoring_is_pure(raw in arb_raw()) {
        let a = score(&raw).unwrap();
        let b = score(&raw).unwrap();
        prop_assert_eq!(a.score_net_mdd.to_bits(), b.score_net_mdd.to_bits());
        prop_assert_eq!(a.trade_multiplier.to_bits(), b.trade_multiplier.to_bits());
        prop_assert_eq!(a.final_score.to_bits(), b.final_score.to_bits());
        prop_assert!(a.final_score.is_finite());
    }

    #[test]
    fn zero_drawdown_is_never_scored(profit in -1e6..1e6_f64, trades in 0u64..10_000) {
        let err = score(&RawMetrics::new(profit, 0.0, trades)).unwrap_err();
        prop_assert!(matches!(err, ScoringError::MetricUndefined(_)), "unexpected error: {err}");
    }
}

// ── 5. Fingerprint stability ─────────────────────────────────────────

fn policy_toml(threshold: f64, blank_lines: usize, gate_fields_reversed: bool) -> String {
    let pad = "\n".repeat(blank_lines);
    let gate = if gate_fields_reversed {
        format!("fail_reason = \"too few\"\nthreshold = {threshold:?}\nop = \">=\"\nmetric = \"trades\"\n")
    } else {
        format!("metric = \"trades\"\nop = \">=\"\nthreshold = {threshold:?}\nfail_reason = \"too few\"\n")
    };
    format!(
        "name = \"prop\"{pad}\nschema_version = 1\n\n[modes]\nscoring_guards_enabled = false\nmode_b_enabled = true\n{pad}\n[[gates]]\n{gate}"
    )
}

proptest! {
    #[test]
    fn fingerprint_ignores_formatting(threshold in -1e3..1e3_f64, pad in 0usize..4) {
        let a = PolicyDocument::parse(&policy_toml(threshold, 0, false), PolicyFormat::Toml, "a").unwrap();
        let b = PolicyDocument::parse(&policy_toml(threshold, pad, true), PolicyFormat::Toml, "b").unwrap();
        prop_assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let json = serde_json::to_string_pretty(&a).unwrap();
        let c = PolicyDocument::parse(&json, PolicyFormat::Json, "c").unwrap();
        prop_assert_eq!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }
}

// ── 6. Plateau order independence ────────────────────────────────────

fn arb_pool() -> impl Strategy<Value = Vec<PlateauCandidate>> {
    prop::collection::vec((0.0..100.0_f64, -5.0..50.0_f64), 2..24).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (x, s))| PlateauCandidate {
                candidate_id: CandidateId::new(format!("c{i:03}")),
                score: s,
                params: [("x".to_string(), ParamValue::Number(x))].into_iter().collect(),
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn plateau_ignores_input_order(pool in arb_pool(), k in 1usize..8, seed in any::<u64>()) {
        let forward = identify_plateau(&pool, k, 0.15).unwrap();

        let mut shuffled = pool.clone();
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();
        let other = identify_plateau(&shuffled, k, 0.15).unwrap();

        prop_assert_eq!(&forward, &other);
        prop_assert!(forward.plateau_region.members.contains(&forward.selected_main.candidate_id));
        prop_assert!((0.0..=1.0).contains(&forward.plateau_region.stability_score));
    }
}
