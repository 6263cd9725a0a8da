//! Plateau run: load a candidate pool, detect the plateau, persist the choice.
//!
//! Outputs land in a `plateau/` directory next to the input file (or in a
//! caller-chosen directory for in-memory pools):
//! - `plateau_report.json`: the full [`PlateauReport`] plus run metadata;
//! - `chosen_params.json`: main and backup parameter sets with BLAKE3 params hashes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use gatelab_core::canonical::{blake3_content_id, ensure_finite, CanonicalError};
use gatelab_core::plateau::{
    identify_plateau_with, load_candidates, CandidateLoadError, ParamValue, PlateauCandidate,
    PlateauConfig, PlateauError, PlateauReport,
};
use gatelab_core::CandidateId;

use crate::atomic::{write_canonical_json, JsonWriteError};

pub const PLATEAU_DIR: &str = "plateau";
pub const REPORT_FILE: &str = "plateau_report.json";
pub const CHOSEN_FILE: &str = "chosen_params.json";

#[derive(Debug, Error)]
pub enum PlateauRunError {
    #[error(transparent)]
    Load(#[from] CandidateLoadError),
    #[error(transparent)]
    Plateau(#[from] PlateauError),
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    #[error(transparent)]
    Write(#[from] JsonWriteError),
}

/// One selected parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChosenParams {
    pub candidate_id: CandidateId,
    pub score: f64,
    pub params: BTreeMap<String, ParamValue>,
    /// BLAKE3 of the canonical params object.
    pub params_hash: String,
}

impl ChosenParams {
    fn from_candidate(candidate: &PlateauCandidate) -> Result<Self, CanonicalError> {
        Ok(Self {
            candidate_id: candidate.candidate_id.clone(),
            score: candidate.score,
            params: candidate.params.clone(),
            params_hash: blake3_content_id(&candidate.params)?,
        })
    }
}

/// Contents of `chosen_params.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChosenParamsFile {
    pub generated_at: String,
    pub source: String,
    pub stability_score: f64,
    pub region: Vec<CandidateId>,
    pub main: ChosenParams,
    pub backups: Vec<ChosenParams>,
}

#[derive(Debug, Serialize)]
struct ReportFile<'a> {
    generated_at: &'a str,
    source: &'a str,
    config: &'a PlateauConfig,
    report: &'a PlateauReport,
}

/// What a plateau run produced.
#[derive(Debug, Clone)]
pub struct PlateauRunOutput {
    pub report: PlateauReport,
    pub chosen: ChosenParamsFile,
    pub report_path: PathBuf,
    pub chosen_path: PathBuf,
}

/// `<input dir>/plateau`.
pub fn output_dir_for(input: &Path) -> PathBuf {
    input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(PLATEAU_DIR)
}

/// Run the detector over `input` and write both outputs into [`output_dir_for`].
pub fn run_plateau(
    input: &Path,
    config: &PlateauConfig,
    generated_at: DateTime<Utc>,
) -> Result<PlateauRunOutput, PlateauRunError> {
    let pool = load_candidates(input)?;
    let source = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    run_plateau_pool(&pool, &source, &output_dir_for(input), config, generated_at)
}

/// Run the detector over an already parsed pool and write both outputs into
/// `out_dir`. `source` names the pool in the written artifacts.
pub fn run_plateau_pool(
    pool: &[PlateauCandidate],
    source: &str,
    out_dir: &Path,
    config: &PlateauConfig,
    generated_at: DateTime<Utc>,
) -> Result<PlateauRunOutput, PlateauRunError> {
    let report = identify_plateau_with(pool, config)?;

    // Loader accepts any JSON number; the artifacts must stay valid JSON.
    for n in &report.neighborhoods {
        ensure_finite("neighborhood.dispersion", n.dispersion)?;
        ensure_finite("neighborhood.stability", n.stability)?;
    }

    let stamp = generated_at.to_rfc3339_opts(SecondsFormat::Secs, true);

    let chosen = ChosenParamsFile {
        generated_at: stamp.clone(),
        source: source.to_string(),
        stability_score: report.plateau_region.stability_score,
        region: report.plateau_region.members.iter().cloned().collect(),
        main: ChosenParams::from_candidate(&report.selected_main)?,
        backups: report
            .selected_backup
            .iter()
            .map(ChosenParams::from_candidate)
            .collect::<Result<_, _>>()?,
    };

    let report_path = out_dir.join(REPORT_FILE);
    let chosen_path = out_dir.join(CHOSEN_FILE);

    write_canonical_json(
        &report_path,
        &ReportFile {
            generated_at: &stamp,
            source,
            config,
            report: &report,
        },
    )?;
    write_canonical_json(&chosen_path, &chosen)?;

    info!(
        source,
        out_dir = %out_dir.display(),
        candidates = report.candidates_seen,
        main = %report.selected_main.candidate_id,
        stability = report.plateau_region.stability_score,
        "plateau outputs written"
    );

    Ok(PlateauRunOutput {
        report,
        chosen,
        report_path,
        chosen_path,
    })
}
