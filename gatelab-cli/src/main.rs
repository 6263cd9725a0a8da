//! GateLab CLI: policy listing, job evaluation, plateau runs and governance.
//!
//! Commands:
//! - `policies`: list available policies with their fingerprints
//! - `evaluate`: run one job directory through a policy and write its audit pair
//! - `plateau`: pick a stable parameter region from a candidate pool
//! - `governance record` / `governance state`: append to and replay the governance log

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gatelab_core::canonical::sha256_prefixed;
use gatelab_core::plateau::parse_candidates_str;
use gatelab_core::{CandidateId, EvidenceRef, GovernanceDecision, PolicyRegistry};
use gatelab_runner::plateau_run::PLATEAU_DIR;
use gatelab_runner::{policy_listing, run_plateau, run_plateau_pool, GatelabConfig, GovernanceLog, Pipeline};

const GOVERNANCE_LOG_FILE: &str = "governance.jsonl";

#[derive(Parser)]
#[command(
    name = "gatelab",
    about = "GateLab CLI: policy-driven robustness gating for backtest candidates"
)]
struct Cli {
    /// Runner configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available policies with their fingerprints.
    Policies {
        /// Print the listing payload as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Evaluate one job directory and write its audit artifacts.
    Evaluate {
        /// Directory holding metrics.json and any mode-specific artifacts.
        job_dir: PathBuf,

        /// Policy selector: a built-in alias or a file name in the policy directory.
        #[arg(long, default_value = "default")]
        policy: String,
    },
    /// Select a plateau main candidate and backups from a candidate pool.
    Plateau {
        /// Candidate pool JSON. Defaults to a bundled demo pool, written under <output_dir>/plateau.
        path: Option<PathBuf>,

        /// Override `plateau.k_neighbors`.
        #[arg(long)]
        k_neighbors: Option<usize>,

        /// Override `plateau.score_threshold_rel`.
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Governance log commands.
    Governance {
        /// Log file. Defaults to <output_dir>/governance.jsonl.
        #[arg(long)]
        log: Option<PathBuf>,

        #[command(subcommand)]
        action: GovernanceAction,
    },
}

#[derive(Subcommand)]
enum GovernanceAction {
    /// Append a decision and print the resulting lifecycle transition.
    Record {
        candidate_id: String,

        /// KEEP, FREEZE or DROP.
        #[arg(long)]
        decision: GovernanceDecision,

        /// Free-text reason (repeatable).
        #[arg(long = "reason")]
        reasons: Vec<String>,

        /// Evidence file as KIND=PATH (repeatable). Existing files are hashed.
        #[arg(long = "evidence")]
        evidence: Vec<String>,
    },
    /// Replay a candidate's history and print its lifecycle state.
    State {
        candidate_id: String,

        /// Also print every recorded item.
        #[arg(long, default_value_t = false)]
        history: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Policies { json } => run_policies(&config, json),
        Commands::Evaluate { job_dir, policy } => run_evaluate(config, &job_dir, &policy),
        Commands::Plateau {
            path,
            k_neighbors,
            threshold,
        } => run_plateau_cmd(config, path, k_neighbors, threshold),
        Commands::Governance { log, action } => {
            let log = GovernanceLog::new(log.unwrap_or_else(|| config.output_dir.join(GOVERNANCE_LOG_FILE)));
            match action {
                GovernanceAction::Record {
                    candidate_id,
                    decision,
                    reasons,
                    evidence,
                } => run_governance_record(&log, candidate_id, decision, reasons, &evidence),
                GovernanceAction::State {
                    candidate_id,
                    history,
                } => run_governance_state(&log, candidate_id, history),
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<GatelabConfig> {
    match path {
        Some(path) => GatelabConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(GatelabConfig::default()),
    }
}

fn run_policies(config: &GatelabConfig, json: bool) -> Result<()> {
    let registry = PolicyRegistry::new(&config.policy_dir)
        .with_context(|| format!("opening policy directory {}", config.policy_dir.display()))?;
    let listing = policy_listing(&registry).context("listing policies")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("{:<16} {:<20} {:<7} {:<7} HASH", "SELECTOR", "SOURCE", "MODE_B", "GUARDS");
    for entry in &listing.entries {
        println!(
            "{:<16} {:<20} {:<7} {:<7} {}",
            entry.selector,
            entry.resolved_source,
            entry.modes.mode_b_enabled,
            entry.modes.scoring_guards_enabled,
            entry.hash
        );
    }
    Ok(())
}

fn run_evaluate(config: GatelabConfig, job_dir: &Path, selector: &str) -> Result<()> {
    let pipeline = Pipeline::new(config).context("initializing pipeline")?;
    let report = pipeline
        .evaluate_job(job_dir, selector)
        .with_context(|| format!("evaluating {}", job_dir.display()))?;

    println!("=== {} ===", report.job_id);
    println!("Policy:       {} ({})", report.selector, report.fingerprint);
    println!("Verdict:      {}", report.verdict);
    println!("Governance:   {}", report.suggested_governance);
    match report.final_score {
        Some(score) => println!("Final score:  {score:.4}"),
        None => println!("Final score:  n/a (screened out by Mode B)"),
    }
    println!("Summary:      {}", report.artifacts.summary_path.display());
    println!("Breakdown:    {}", report.artifacts.breakdown_path.display());
    Ok(())
}

/// Demo candidate pool compiled into the binary.
const BUNDLED_POOL: &str = include_str!("../../gatelab-core/tests/fixtures/plateau_candidates.json");
const BUNDLED_POOL_NAME: &str = "bundled:plateau_candidates.json";

fn run_plateau_cmd(
    mut config: GatelabConfig,
    path: Option<PathBuf>,
    k_neighbors: Option<usize>,
    threshold: Option<f64>,
) -> Result<()> {
    if let Some(k) = k_neighbors {
        config.plateau.k_neighbors = k;
    }
    if let Some(t) = threshold {
        config.plateau.score_threshold_rel = t;
    }
    config.validate()?;

    let out = match path {
        Some(input) => run_plateau(&input, &config.plateau, Utc::now())
            .with_context(|| format!("plateau run over {}", input.display()))?,
        None => {
            let pool = parse_candidates_str(BUNDLED_POOL).context("parsing bundled candidate pool")?;
            let out_dir = config.output_dir.join(PLATEAU_DIR);
            run_plateau_pool(&pool, BUNDLED_POOL_NAME, &out_dir, &config.plateau, Utc::now())
                .context("plateau run over bundled candidate pool")?
        }
    };

    println!("Candidates:   {}", out.report.candidates_seen);
    println!(
        "Main:         {} (score {:.4})",
        out.chosen.main.candidate_id, out.chosen.main.score
    );
    for (i, backup) in out.chosen.backups.iter().enumerate() {
        println!("Backup #{}:    {} (score {:.4})", i + 1, backup.candidate_id, backup.score);
    }
    println!("Region:       {} members, stability {:.4}", out.chosen.region.len(), out.chosen.stability_score);
    println!("Report:       {}", out.report_path.display());
    println!("Chosen:       {}", out.chosen_path.display());
    Ok(())
}

fn parse_evidence(spec: &str) -> Result<EvidenceRef> {
    let Some((kind, path)) = spec.split_once('=') else {
        bail!("evidence `{spec}` must be KIND=PATH");
    };
    if kind.is_empty() || path.is_empty() {
        bail!("evidence `{spec}` must be KIND=PATH");
    }
    let hash = match std::fs::read(path) {
        Ok(bytes) => Some(sha256_prefixed(&bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("reading evidence {path}")),
    };
    Ok(EvidenceRef {
        kind: kind.to_string(),
        path: path.to_string(),
        hash,
    })
}

fn run_governance_record(
    log: &GovernanceLog,
    candidate_id: String,
    decision: GovernanceDecision,
    reasons: Vec<String>,
    evidence: &[String],
) -> Result<()> {
    let evidence = evidence
        .iter()
        .map(|e| parse_evidence(e))
        .collect::<Result<Vec<_>>>()?;

    let transition = log
        .record(CandidateId::new(candidate_id), decision, reasons, evidence, Utc::now())
        .with_context(|| format!("recording to {}", log.path().display()))?;

    println!(
        "{}: {} -> {} ({})",
        transition.item.candidate_id, transition.previous, transition.current, decision
    );
    println!("Provenance:   {}", transition.item.provenance_id);
    Ok(())
}

fn run_governance_state(log: &GovernanceLog, candidate_id: String, history: bool) -> Result<()> {
    let id = CandidateId::new(candidate_id);
    let items = log
        .history(&id)
        .with_context(|| format!("reading {}", log.path().display()))?;
    let state = gatelab_core::governance::current_state(&items);

    println!("{id}: {state} ({} events)", items.len());
    if history {
        for item in &items {
            println!(
                "  {}  {:<6}  {}",
                item.created_at.to_rfc3339(),
                item.decision,
                item.reasons.join("; ")
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_pool_is_compiled_in_and_parses() {
        let pool = parse_candidates_str(BUNDLED_POOL).unwrap();
        assert_eq!(pool.len(), 12);
    }

    #[test]
    fn evidence_must_be_kind_equals_path() {
        assert!(parse_evidence("no-separator").is_err());
        assert!(parse_evidence("=path").is_err());
        let evidence = parse_evidence("summary=/definitely/not/here.json").unwrap();
        assert_eq!(evidence.kind, "summary");
        assert_eq!(evidence.hash, None);
    }
}
