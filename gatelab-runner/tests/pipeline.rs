//! End-to-end job pipeline: job directory in, verdict and audit pair out.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::TempDir;

use gatelab_core::canonical::sha256_prefixed;
use gatelab_core::policy::{PolicyError, PolicySelectorError};
use gatelab_core::{GovernanceDecision, Verdict};
use gatelab_runner::pipeline::{CLIFF_BASELINE_FILE, SIGNALS_FILE};
use gatelab_runner::{GatelabConfig, Pipeline, PipelineError};

// ── Fixtures ─────────────────────────────────────────────────────────

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Temp dir holding a copy of the shipped policies and an empty output root.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let shipped = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../policies");
        let policies = dir.path().join("policies");
        fs::create_dir_all(&policies).unwrap();
        for name in ["default.toml", "red_team.toml"] {
            fs::copy(shipped.join(name), policies.join(name)).unwrap();
        }
        Self { dir }
    }

    fn config(&self) -> GatelabConfig {
        GatelabConfig {
            policy_dir: self.dir.path().join("policies"),
            output_dir: self.dir.path().join("artifacts"),
            ..GatelabConfig::default()
        }
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.config()).unwrap()
    }

    fn advisory_pipeline(&self) -> Pipeline {
        Pipeline::new(GatelabConfig {
            enforce_policy: false,
            ..self.config()
        })
        .unwrap()
    }

    fn job(&self, id: &str, files: &[(&str, Value)]) -> PathBuf {
        let job = self.dir.path().join("jobs").join(id);
        fs::create_dir_all(&job).unwrap();
        for (name, value) in files {
            fs::write(job.join(name), serde_json::to_string(value).unwrap()).unwrap();
        }
        job
    }

    fn artifacts(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }
}

fn healthy_metrics() -> Value {
    json!({"net_profit": 1000.0, "max_drawdown": 100.0, "trades": 50, "sharpe": 1.4})
}

fn neighbor_baseline() -> Value {
    json!({"kind": "neighbors", "scores": [24.0, 25.5, 26.0, 23.8, 25.1]})
}

fn reference_series() -> Value {
    json!((1..=100).map(f64::from).collect::<Vec<_>>())
}

/// 30 bars out of 100 at `magnitude`.
fn signals_at(magnitude: f64) -> Value {
    json!((0..100).map(|i| if i % 10 < 3 { magnitude } else { 0.0 }).collect::<Vec<f64>>())
}

/// 30 bars out of 100, well above the calibrated threshold of the reference ramp.
fn moderate_signals() -> Value {
    signals_at(100.0)
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

// ── 1. Admission under the default policy ────────────────────────────

#[test]
fn default_policy_admits_and_writes_linked_audit_pair() {
    let ws = Workspace::new();
    let job = ws.job(
        "cand-001",
        &[("metrics.json", healthy_metrics()), (CLIFF_BASELINE_FILE, neighbor_baseline())],
    );

    let report = ws.pipeline().evaluate_job(&job, "default").unwrap();
    assert_eq!(report.job_id.as_str(), "cand-001");
    assert_eq!(report.verdict, Verdict::Admit);
    assert_eq!(report.suggested_governance, GovernanceDecision::Keep);
    assert!(!report.screened);
    let final_score = report.final_score.unwrap();
    assert!((final_score - 10.0 * 50f64.powf(0.25)).abs() < 1e-9);

    let job_out = ws.artifacts().join("cand-001");
    assert_eq!(report.artifacts.summary_path, job_out.join("governance_summary.json"));
    assert_eq!(report.artifacts.breakdown_path, job_out.join("scoring_breakdown.json"));

    let summary = read_json(&report.artifacts.summary_path);
    assert_eq!(summary["verdict"], "ADMIT");
    assert_eq!(summary["suggested_governance"], "KEEP");
    assert_eq!(summary["policy_enforced"], true);
    assert_eq!(summary["compliance_passed"], true);
    assert_eq!(summary["screened"], false);
    assert_eq!(summary["policy"]["selector"], "default");
    assert_eq!(summary["policy"]["fingerprint"], report.fingerprint.as_str());
    assert_eq!(summary["gates"].as_array().unwrap().len(), 3);
    assert_eq!(summary["links"]["scoring_breakdown"], "scoring_breakdown.json");

    let breakdown = read_json(&report.artifacts.breakdown_path);
    assert_eq!(breakdown["inputs"]["net_profit"], 1000.0);
    assert_eq!(breakdown["metrics"]["score_net_mdd"], 10.0);
    assert_eq!(breakdown["derived"]["robustness_factor"], 1.0);
    assert_eq!(breakdown["links"]["governance_summary"], "governance_summary.json");
    assert!(breakdown["mode_b"].is_null());

    let bytes = fs::read(&report.artifacts.summary_path).unwrap();
    assert_eq!(report.artifacts.summary_hash, sha256_prefixed(&bytes));
}

// ── 2. Missing artifacts fail before evaluation ──────────────────────

#[test]
fn missing_cliff_baseline_fails_before_any_output() {
    let ws = Workspace::new();
    let job = ws.job("cand-002", &[("metrics.json", healthy_metrics())]);

    let err = ws.pipeline().evaluate_job(&job, "default").unwrap_err();
    match err {
        PipelineError::ArtifactMissing { file, .. } => assert_eq!(file, CLIFF_BASELINE_FILE),
        other => panic!("expected ArtifactMissing, got {other:?}"),
    }
    assert!(!ws.artifacts().join("cand-002").exists());
}

#[test]
fn mode_b_policy_requires_signal_files() {
    let ws = Workspace::new();
    let job = ws.job(
        "cand-003",
        &[("metrics.json", healthy_metrics()), (CLIFF_BASELINE_FILE, neighbor_baseline())],
    );

    let err = ws.pipeline().evaluate_job(&job, "red_team").unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ArtifactMissing { file, .. } if file == SIGNALS_FILE
    ));
}

#[test]
fn malformed_metrics_is_an_invalid_artifact() {
    let ws = Workspace::new();
    let job = ws.job(
        "cand-004",
        &[("metrics.json", json!({"net_profit": "lots"})), (CLIFF_BASELINE_FILE, neighbor_baseline())],
    );
    assert!(matches!(
        ws.pipeline().evaluate_job(&job, "default"),
        Err(PipelineError::InvalidArtifact { .. })
    ));
}

// ── 3. Policy selection stays sandboxed ──────────────────────────────

#[test]
fn traversal_selector_is_rejected() {
    let ws = Workspace::new();
    let job = ws.job("cand-005", &[("metrics.json", healthy_metrics())]);
    let err = ws.pipeline().evaluate_job(&job, "../../etc/passwd").unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Policy(PolicyError::Selector(PolicySelectorError::PathTraversal(_)))
    ));
}

// ── 4. Mode B screening ──────────────────────────────────────────────

#[test]
fn silent_candidate_is_screened_out_under_enforcement() {
    let ws = Workspace::new();
    let job = ws.job(
        "cand-006",
        &[
            ("metrics.json", healthy_metrics()),
            (CLIFF_BASELINE_FILE, json!({"kind": "reference", "score": 26.0})),
            (SIGNALS_FILE, json!(vec![0.0; 100])),
            ("tsr_reference.json", reference_series()),
        ],
    );

    let report = ws.pipeline().evaluate_job(&job, "red_team").unwrap();
    assert!(report.screened);
    assert_eq!(report.verdict, Verdict::Reject);
    assert_eq!(report.suggested_governance, GovernanceDecision::Drop);
    assert_eq!(report.final_score, None);

    let summary = read_json(&report.artifacts.summary_path);
    assert_eq!(summary["screened"], true);
    assert_eq!(summary["verdict"], "REJECT");
    assert!(summary["final_score"].is_null());
    let first_note = summary["notes"][0].as_str().unwrap();
    assert!(first_note.starts_with("mode B screen failed"), "{first_note}");

    let breakdown = read_json(&report.artifacts.breakdown_path);
    assert_eq!(breakdown["mode_b"]["signal_rate"], 0.0);
    assert!(breakdown["derived"].is_null());
}

#[test]
fn screen_failure_is_only_noted_in_advisory_mode() {
    let ws = Workspace::new();
    let job = ws.job(
        "cand-007",
        &[
            ("metrics.json", healthy_metrics()),
            (CLIFF_BASELINE_FILE, json!({"kind": "reference", "score": 26.0})),
            (SIGNALS_FILE, json!(vec![0.0; 100])),
            ("tsr_reference.json", reference_series()),
        ],
    );

    let report = ws.advisory_pipeline().evaluate_job(&job, "red_team").unwrap();
    assert!(!report.screened);
    // Advisory engines never reject; the trades gate still fails.
    assert_eq!(report.verdict, Verdict::Admit);
    assert_eq!(report.suggested_governance, GovernanceDecision::Drop);

    let summary = read_json(&report.artifacts.summary_path);
    assert_eq!(summary["policy_enforced"], false);
    assert_eq!(summary["compliance_passed"], false);
    let notes: Vec<&str> = summary["notes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n.as_str().unwrap())
        .collect();
    assert!(notes.iter().any(|n| n.starts_with("advisory: mode B")));
    assert!(notes.iter().any(|n| n.starts_with("advisory: gate #0 failed")));
}

#[test]
fn active_candidate_passes_screen_and_meets_red_team_gates() {
    let ws = Workspace::new();
    let job = ws.job(
        "cand-008",
        &[
            ("metrics.json", healthy_metrics()),
            (CLIFF_BASELINE_FILE, json!({"kind": "reference", "score": 26.0})),
            (SIGNALS_FILE, moderate_signals()),
            ("tsr_reference.json", reference_series()),
        ],
    );

    let report = ws.pipeline().evaluate_job(&job, "red_team").unwrap();
    assert!(!report.screened);
    // 50 trades < 100.
    assert_eq!(report.verdict, Verdict::Reject);
    assert_eq!(report.suggested_governance, GovernanceDecision::Drop);

    let breakdown = read_json(&report.artifacts.breakdown_path);
    assert_eq!(breakdown["mode_b"]["passed"], true);
    assert_eq!(breakdown["mode_b"]["signal_rate"], 0.3);
    assert_eq!(breakdown["mode_b"]["threshold"], 50.5);
}

#[test]
fn weak_signals_below_the_calibrated_anchor_are_screened_out() {
    let ws = Workspace::new();
    // Same 30% activity as the passing candidate, but every bar sits below the
    // loosest admissible anchor of the reference series.
    let job = ws.job(
        "cand-009",
        &[
            ("metrics.json", healthy_metrics()),
            (CLIFF_BASELINE_FILE, json!({"kind": "reference", "score": 26.0})),
            (SIGNALS_FILE, signals_at(1.0)),
            ("tsr_reference.json", reference_series()),
        ],
    );

    let report = ws.pipeline().evaluate_job(&job, "red_team").unwrap();
    assert!(report.screened);
    assert_eq!(report.verdict, Verdict::Reject);

    let breakdown = read_json(&report.artifacts.breakdown_path);
    assert_eq!(breakdown["mode_b"]["passed"], false);
    assert_eq!(breakdown["mode_b"]["signal_rate"], 0.0);
    assert_eq!(breakdown["mode_b"]["threshold"], 50.5);
}
