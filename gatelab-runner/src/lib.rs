//! GateLab Runner: the side-effecting edge around `gatelab-core`.
//!
//! This crate builds on `gatelab-core` to provide:
//! - TOML runner configuration with per-section defaults
//! - The job pipeline (job directory in, verdict and audit pair out)
//! - Canonical, atomically written audit artifacts
//! - The append-only JSONL governance log
//! - Plateau run outputs (`plateau_report.json`, `chosen_params.json`)
//! - The policy listing payload

pub mod atomic;
pub mod audit;
pub mod config;
pub mod governance_log;
pub mod listing;
pub mod pipeline;
pub mod plateau_run;

pub use atomic::{write_atomic, write_canonical_json, JsonWriteError};
pub use audit::{AuditError, AuditOutcome, AuditPaths, AuditRecord, AuditWriter};
pub use config::{ConfigError, GatelabConfig};
pub use governance_log::{GovernanceLog, GovernanceLogError, Transition};
pub use listing::{policy_listing, PolicyListing, PolicyListingEntry};
pub use pipeline::{JobReport, Pipeline, PipelineError};
pub use plateau_run::{run_plateau, run_plateau_pool, ChosenParams, ChosenParamsFile, PlateauRunError, PlateauRunOutput};
