//! End-to-end job pipeline.
//!
//! One job directory holds the artifacts for one candidate:
//!
//! | file | when required |
//! |---|---|
//! | `metrics.json` | always (`RawMetrics`) |
//! | `cliff_baseline.json` | policy enables scoring guards (`CliffBaseline`) |
//! | `signals.json` | policy enables Mode B (candidate signal series) |
//! | `tsr_reference.json` | policy enables Mode B (reference series) |
//!
//! Every required file is checked before anything is evaluated. The flow is
//! Mode B screen → score → guards → policy engine → audit pair. Everything up
//! to the audit write is pure.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

use gatelab_core::anchors::{AnchorError, SignalDensityFilter, SignalScreen};
use gatelab_core::engine::{EngineError, PolicyEngine, Verdict};
use gatelab_core::governance::GovernanceDecision;
use gatelab_core::policy::{LoadedPolicy, PolicyError, PolicyRegistry, PolicySelectorError};
use gatelab_core::scoring::{apply_guards, score, CliffBaseline, GuardError, ScoringError};
use gatelab_core::{JobId, RawMetrics};

use crate::audit::{AuditError, AuditOutcome, AuditPaths, AuditRecord, AuditWriter};
use crate::config::{ConfigError, GatelabConfig};

pub const METRICS_FILE: &str = "metrics.json";
pub const CLIFF_BASELINE_FILE: &str = "cliff_baseline.json";
pub const SIGNALS_FILE: &str = "signals.json";
pub const TSR_REFERENCE_FILE: &str = "tsr_reference.json";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("required artifact `{file}` is missing from {job_dir}")]
    ArtifactMissing { job_dir: PathBuf, file: &'static str },
    #[error("artifact {path} is invalid: {source}")]
    InvalidArtifact {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("job directory {0} does not name a safe job id")]
    UnsafeJobId(PathBuf),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error(transparent)]
    Anchor(#[from] AnchorError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl From<PolicySelectorError> for PipelineError {
    fn from(e: PolicySelectorError) -> Self {
        Self::Policy(PolicyError::Selector(e))
    }
}

/// Outcome of one job, as reported to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: JobId,
    pub selector: String,
    pub fingerprint: String,
    pub verdict: Verdict,
    pub suggested_governance: GovernanceDecision,
    /// `None` when the candidate was screened out before scoring.
    pub final_score: Option<f64>,
    pub screened: bool,
    pub artifacts: AuditPaths,
}

/// Job artifacts after the presence check.
#[derive(Debug)]
struct JobInputs {
    raw: RawMetrics,
    baseline: Option<CliffBaseline>,
    mode_b: Option<(Vec<f64>, Vec<f64>)>,
}

/// Policy registry, engine and audit writer wired from one configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: GatelabConfig,
    config_hash: String,
    registry: PolicyRegistry,
    engine: PolicyEngine,
    writer: AuditWriter,
}

impl Pipeline {
    pub fn new(config: GatelabConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let registry = PolicyRegistry::new(&config.policy_dir)?;
        let engine = PolicyEngine::new(config.enforce_policy);
        let writer = AuditWriter::new(&config.output_dir);
        let config_hash = config.config_hash()?;
        Ok(Self {
            config,
            config_hash,
            registry,
            engine,
            writer,
        })
    }

    pub fn config(&self) -> &GatelabConfig {
        &self.config
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn engine(&self) -> PolicyEngine {
        self.engine
    }

    /// Evaluate the candidate in `job_dir` under the policy named by `selector`.
    ///
    /// The job id is the directory's file name.
    pub fn evaluate_job(&self, job_dir: &Path, selector: &str) -> Result<JobReport, PipelineError> {
        let job_id = job_id_for(job_dir)?;
        let policy = self.registry.load(selector)?;
        let inputs = read_inputs(job_dir, &policy)?;

        info!(
            job_id = %job_id,
            selector,
            fingerprint = policy.fingerprint(),
            enforced = self.engine.is_enforcing(),
            "evaluating job"
        );

        let screen = match &inputs.mode_b {
            Some((signals, reference)) => {
                let filter = SignalDensityFilter::calibrate(
                    &self.config.mode_b.calibration(reference.clone()),
                )?;
                Some(filter.screen(signals))
            }
            None => None,
        };

        if let Some(screen) = screen.as_ref().filter(|s| !s.passed) {
            if self.engine.is_enforcing() {
                warn!(job_id = %job_id, signal_rate = screen.signal_rate, "candidate screened out by Mode B");
                return self.write_screened(&job_id, &policy, &inputs.raw, screen);
            }
            debug!(job_id = %job_id, signal_rate = screen.signal_rate, "Mode B screen failed (advisory)");
        }

        let mut derived = score(&inputs.raw)?;
        let guards = match &inputs.baseline {
            Some(baseline) => {
                let report = apply_guards(&inputs.raw, &derived, &self.config.guards, baseline)?;
                derived = derived.with_robustness(report.robustness_factor);
                Some(report)
            }
            None => None,
        };

        let mut decision = self
            .engine
            .apply(policy.document(), &inputs.raw, &derived, guards.as_ref())?;
        if let Some(screen) = screen.as_ref().filter(|s| !s.passed) {
            decision.notes.insert(
                0,
                format!("advisory: mode B signal rate {:.4} outside band", screen.signal_rate),
            );
        }

        let record = AuditRecord {
            job_id: &job_id,
            policy: &policy,
            config_hash: &self.config_hash,
            raw: &inputs.raw,
            screen: screen.as_ref(),
            outcome: AuditOutcome::Evaluated {
                derived: &derived,
                guards: guards.as_ref(),
                decision: &decision,
            },
        };
        let artifacts = self.writer.write(&record, Utc::now())?;

        Ok(JobReport {
            job_id,
            selector: policy.selector().to_string(),
            fingerprint: policy.fingerprint().to_string(),
            verdict: decision.verdict(),
            suggested_governance: decision.suggested_governance(),
            final_score: Some(decision.final_score),
            screened: false,
            artifacts,
        })
    }

    fn write_screened(
        &self,
        job_id: &JobId,
        policy: &LoadedPolicy,
        raw: &RawMetrics,
        screen: &SignalScreen,
    ) -> Result<JobReport, PipelineError> {
        let record = AuditRecord {
            job_id,
            policy,
            config_hash: &self.config_hash,
            raw,
            screen: Some(screen),
            outcome: AuditOutcome::Screened,
        };
        let artifacts = self.writer.write(&record, Utc::now())?;
        Ok(JobReport {
            job_id: job_id.clone(),
            selector: policy.selector().to_string(),
            fingerprint: policy.fingerprint().to_string(),
            verdict: Verdict::Reject,
            suggested_governance: GovernanceDecision::Drop,
            final_score: None,
            screened: true,
            artifacts,
        })
    }
}

fn job_id_for(job_dir: &Path) -> Result<JobId, PipelineError> {
    let id = job_dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(JobId::new)
        .filter(JobId::is_path_safe);
    id.ok_or_else(|| PipelineError::UnsafeJobId(job_dir.to_path_buf()))
}

/// Presence check for every file the policy requires, then parse them.
fn read_inputs(job_dir: &Path, policy: &LoadedPolicy) -> Result<JobInputs, PipelineError> {
    let modes = policy.modes();

    let mut required = vec![METRICS_FILE];
    if modes.scoring_guards_enabled {
        required.push(CLIFF_BASELINE_FILE);
    }
    if modes.mode_b_enabled {
        required.extend([SIGNALS_FILE, TSR_REFERENCE_FILE]);
    }
    if let Some(file) = required.into_iter().find(|f| !job_dir.join(f).is_file()) {
        warn!(job_dir = %job_dir.display(), file, "required artifact missing");
        return Err(PipelineError::ArtifactMissing {
            job_dir: job_dir.to_path_buf(),
            file,
        });
    }

    let raw = read_json(&job_dir.join(METRICS_FILE))?;
    let baseline = if modes.scoring_guards_enabled {
        Some(read_json(&job_dir.join(CLIFF_BASELINE_FILE))?)
    } else {
        None
    };
    let mode_b = if modes.mode_b_enabled {
        Some((
            read_json(&job_dir.join(SIGNALS_FILE))?,
            read_json(&job_dir.join(TSR_REFERENCE_FILE))?,
        ))
    } else {
        None
    };

    Ok(JobInputs {
        raw,
        baseline,
        mode_b,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| PipelineError::InvalidArtifact {
        path: path.to_path_buf(),
        source,
    })
}
