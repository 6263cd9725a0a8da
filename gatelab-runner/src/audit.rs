//! Audit artifact writer.
//!
//! Each evaluated job gets two canonical JSON documents under
//! `<output_dir>/<job_id>/`:
//!
//! - `governance_summary.json`: verdict, policy identity, gate picture, notes;
//! - `scoring_breakdown.json`: raw inputs, metrics bag, derived scores, guard
//!   and Mode B details.
//!
//! The two link to each other by relative file name. Both are staged to temp
//! files first and only renamed into place once both staged successfully. A
//! failed summary rename restores the breakdown that was there before.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use gatelab_core::anchors::SignalScreen;
use gatelab_core::canonical::{ensure_finite, sha256_prefixed, to_canonical_pretty, CanonicalError};
use gatelab_core::engine::{EvaluationDecision, Verdict};
use gatelab_core::gates::GateResult;
use gatelab_core::governance::GovernanceDecision;
use gatelab_core::policy::LoadedPolicy;
use gatelab_core::scoring::{DerivedScores, GuardReport};
use gatelab_core::{JobId, MetricsBag, RawMetrics};

use crate::atomic;

pub const SUMMARY_FILE: &str = "governance_summary.json";
pub const BREAKDOWN_FILE: &str = "scoring_breakdown.json";
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("job id `{0}` is not a safe directory name")]
    UnsafeJobId(String),
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What happened to the candidate.
#[derive(Debug, Clone, Copy)]
pub enum AuditOutcome<'a> {
    /// Scored and run through the policy engine.
    Evaluated {
        derived: &'a DerivedScores,
        guards: Option<&'a GuardReport>,
        decision: &'a EvaluationDecision,
    },
    /// Rejected by the Mode B signal screen before scoring.
    Screened,
}

/// Everything the writer needs for one job.
#[derive(Debug, Clone, Copy)]
pub struct AuditRecord<'a> {
    pub job_id: &'a JobId,
    pub policy: &'a LoadedPolicy,
    pub config_hash: &'a str,
    pub raw: &'a RawMetrics,
    pub screen: Option<&'a SignalScreen>,
    pub outcome: AuditOutcome<'a>,
}

/// Where the pair landed, with the `sha256:` hash of each file's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditPaths {
    pub summary_path: PathBuf,
    pub breakdown_path: PathBuf,
    pub summary_hash: String,
    pub breakdown_hash: String,
}

// ─── Documents ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct PolicyStamp<'a> {
    selector: &'a str,
    name: &'a str,
    fingerprint: &'a str,
    source: String,
}

#[derive(Debug, Serialize)]
struct SummaryLinks {
    scoring_breakdown: &'static str,
}

#[derive(Debug, Serialize)]
struct BreakdownLinks {
    governance_summary: &'static str,
}

#[derive(Debug, Serialize)]
struct GovernanceSummary<'a> {
    artifact: &'static str,
    schema_version: u32,
    job_id: &'a JobId,
    generated_at: String,
    policy: PolicyStamp<'a>,
    config_hash: &'a str,
    policy_enforced: bool,
    compliance_passed: bool,
    guards_passed: bool,
    screened: bool,
    verdict: Verdict,
    suggested_governance: GovernanceDecision,
    final_score: Option<f64>,
    gates: &'a [GateResult],
    edge_gate: Option<&'a GateResult>,
    cliff_gate: Option<&'a GateResult>,
    notes: Vec<String>,
    links: SummaryLinks,
}

#[derive(Debug, Serialize)]
struct ScoringBreakdown<'a> {
    artifact: &'static str,
    schema_version: u32,
    job_id: &'a JobId,
    generated_at: String,
    policy_fingerprint: &'a str,
    inputs: &'a RawMetrics,
    metrics: MetricsBag,
    derived: Option<&'a DerivedScores>,
    guards: Option<&'a GuardReport>,
    mode_b: Option<&'a SignalScreen>,
    links: BreakdownLinks,
}

fn screen_notes(screen: &SignalScreen) -> Vec<String> {
    [&screen.lower, &screen.upper]
        .into_iter()
        .filter(|g| !g.passed)
        .map(|g| format!("mode B screen failed: {}", g.note))
        .collect()
}

fn build_summary<'a>(record: &AuditRecord<'a>, generated_at: &str) -> GovernanceSummary<'a> {
    let policy = PolicyStamp {
        selector: record.policy.selector(),
        name: &record.policy.document().name,
        fingerprint: record.policy.fingerprint(),
        source: record
            .policy
            .source()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    let mut summary = GovernanceSummary {
        artifact: "governance_summary",
        schema_version: ARTIFACT_SCHEMA_VERSION,
        job_id: record.job_id,
        generated_at: generated_at.to_string(),
        policy,
        config_hash: record.config_hash,
        policy_enforced: true,
        compliance_passed: false,
        guards_passed: false,
        screened: true,
        verdict: Verdict::Reject,
        suggested_governance: GovernanceDecision::Drop,
        final_score: None,
        gates: &[],
        edge_gate: None,
        cliff_gate: None,
        notes: record.screen.map(screen_notes).unwrap_or_default(),
        links: SummaryLinks {
            scoring_breakdown: BREAKDOWN_FILE,
        },
    };

    if let AuditOutcome::Evaluated { decision, .. } = record.outcome {
        summary.policy_enforced = decision.policy_enforced;
        summary.compliance_passed = decision.compliance_passed;
        summary.guards_passed = decision.guards_passed;
        summary.screened = false;
        summary.verdict = decision.verdict();
        summary.suggested_governance = decision.suggested_governance();
        summary.final_score = Some(decision.final_score);
        summary.gates = &decision.gates;
        summary.edge_gate = Some(&decision.edge_gate);
        summary.cliff_gate = Some(&decision.cliff_gate);
        // Advisory screen failures come first, then the engine's notes.
        summary.notes.extend(decision.notes.iter().cloned());
    }
    summary
}

fn build_breakdown<'a>(record: &AuditRecord<'a>, generated_at: &str) -> ScoringBreakdown<'a> {
    let (metrics, derived, guards) = match record.outcome {
        AuditOutcome::Evaluated { derived, guards, .. } => {
            (MetricsBag::build(record.raw, derived), Some(derived), guards)
        }
        AuditOutcome::Screened => (MetricsBag::from_raw(record.raw), None, None),
    };
    ScoringBreakdown {
        artifact: "scoring_breakdown",
        schema_version: ARTIFACT_SCHEMA_VERSION,
        job_id: record.job_id,
        generated_at: generated_at.to_string(),
        policy_fingerprint: record.policy.fingerprint(),
        inputs: record.raw,
        metrics,
        derived,
        guards,
        mode_b: record.screen,
        links: BreakdownLinks {
            governance_summary: SUMMARY_FILE,
        },
    }
}

/// serde_json writes NaN/∞ as `null`; refuse them instead.
fn check_finite(record: &AuditRecord<'_>) -> Result<(), CanonicalError> {
    let raw = record.raw;
    ensure_finite("inputs.net_profit", raw.net_profit)?;
    ensure_finite("inputs.max_drawdown", raw.max_drawdown)?;
    if let Some(pf) = raw.profit_factor {
        ensure_finite("inputs.profit_factor", pf)?;
    }
    if let Some(sharpe) = raw.sharpe {
        ensure_finite("inputs.sharpe", sharpe)?;
    }
    if let Some(screen) = record.screen {
        ensure_finite("mode_b.threshold", screen.threshold)?;
        ensure_finite("mode_b.signal_rate", screen.signal_rate)?;
    }
    if let AuditOutcome::Evaluated {
        derived,
        guards,
        decision,
    } = record.outcome
    {
        ensure_finite("derived.score_net_mdd", derived.score_net_mdd)?;
        ensure_finite("derived.trade_multiplier", derived.trade_multiplier)?;
        ensure_finite("derived.final_score", derived.final_score)?;
        if let Some(report) = guards {
            ensure_finite("guards.robustness_factor", report.robustness_factor)?;
        }
        let all_gates = decision
            .gates
            .iter()
            .chain([&decision.edge_gate, &decision.cliff_gate]);
        for gate in all_gates {
            ensure_finite(&format!("gates.{}.threshold", gate.metric), gate.threshold)?;
            if let Some(v) = gate.observed_value {
                ensure_finite(&format!("gates.{}.observed_value", gate.metric), v)?;
            }
        }
    }
    Ok(())
}

/// Writes audit artifact pairs under one output root.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    output_dir: PathBuf,
}

impl AuditWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.output_dir.join(job_id.as_str())
    }

    /// Render and atomically write both documents.
    pub fn write(
        &self,
        record: &AuditRecord<'_>,
        generated_at: DateTime<Utc>,
    ) -> Result<AuditPaths, AuditError> {
        if !record.job_id.is_path_safe() {
            return Err(AuditError::UnsafeJobId(record.job_id.to_string()));
        }
        check_finite(record)?;

        let stamp = generated_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let summary = to_canonical_pretty(&build_summary(record, &stamp))?;
        let breakdown = to_canonical_pretty(&build_breakdown(record, &stamp))?;

        let dir = self.job_dir(record.job_id);
        let summary_path = dir.join(SUMMARY_FILE);
        let breakdown_path = dir.join(BREAKDOWN_FILE);

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| AuditError::Io { path, source }
        };

        let summary_tmp = atomic::stage(&summary_path, summary.as_bytes()).map_err(io_err(&summary_path))?;
        let breakdown_tmp =
            atomic::stage(&breakdown_path, breakdown.as_bytes()).map_err(io_err(&breakdown_path))?;

        // The pair lands together or not at all: if the summary cannot be moved
        // into place, put the breakdown back the way it was.
        let previous_breakdown = fs::read(&breakdown_path).ok();
        atomic::commit(breakdown_tmp, &breakdown_path).map_err(io_err(&breakdown_path))?;
        if let Err(source) = atomic::commit(summary_tmp, &summary_path) {
            let rollback = match &previous_breakdown {
                Some(bytes) => atomic::write_atomic(&breakdown_path, bytes),
                None => fs::remove_file(&breakdown_path),
            };
            if let Err(e) = rollback {
                warn!(path = %breakdown_path.display(), error = %e, "failed to roll back scoring breakdown");
            }
            return Err(AuditError::Io {
                path: summary_path,
                source,
            });
        }

        info!(
            job_id = %record.job_id,
            summary = %summary_path.display(),
            "audit artifacts written"
        );

        Ok(AuditPaths {
            summary_hash: sha256_prefixed(summary.as_bytes()),
            breakdown_hash: sha256_prefixed(breakdown.as_bytes()),
            summary_path,
            breakdown_path,
        })
    }
}
