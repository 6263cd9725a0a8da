//! Plateau / stability detector.
//!
//! A single high score is not evidence of robustness. For every candidate we
//! look at its `k` nearest neighbors in parameter space (see [`space`]) and
//! ask whether their scores stay within `score_threshold_rel` of its own:
//!
//! ```text
//! rel_dev(j)   = |score_j - score_i| / max(|score_i|, ε)
//! consistency  = share of neighbors with rel_dev <= score_threshold_rel
//! dispersion   = median(rel_dev) over neighbors
//! stability    = consistency / (1 + dispersion)          ∈ [0, 1]
//! plateau      = consistency >= min_consistency
//! ```
//!
//! Ranking: plateau candidates first, then by the median score of the
//! neighborhood (candidate + neighbors), then stability, raw score, and finally
//! `candidate_id` ascending. An isolated spike has low consistency and a
//! neighborhood median dragged down by its neighbors, so it loses to a
//! slightly lower but stable region.
//!
//! All tie-breaks go through `candidate_id`; input order never matters.

pub mod loader;
pub(crate) mod space;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::CandidateId;
use crate::scoring::stats::median;
use space::ParamSpace;

pub use loader::{load_candidates, parse_candidates, parse_candidates_str, CandidateLoadError};

const SCORE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlateauError {
    #[error("candidate pool is empty")]
    EmptyPool,
    #[error("invalid plateau configuration: {0}")]
    InvalidConfig(String),
    #[error("duplicate candidate_id `{0}`")]
    DuplicateCandidate(CandidateId),
    #[error("candidate `{0}` has a non-finite score")]
    NonFiniteScore(CandidateId),
    #[error("candidate `{candidate_id}` parameter `{name}` is not finite")]
    NonFiniteParam { candidate_id: CandidateId, name: String },
    #[error("candidate `{candidate_id}` has parameters {found:?}, expected {expected:?}")]
    InconsistentParams {
        candidate_id: CandidateId,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("parameter `{name}` mixes numeric, boolean and text values")]
    MixedParamKinds { name: String },
}

/// A parameter value as produced by the search stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }
}

/// One scored parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauCandidate {
    pub candidate_id: CandidateId,
    pub score: f64,
    pub params: BTreeMap<String, ParamValue>,
}

/// Detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlateauConfig {
    pub k_neighbors: usize,
    pub score_threshold_rel: f64,
    pub backup_count: usize,
    /// Share of neighbors that must agree for a candidate to count as a plateau.
    pub min_consistency: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            score_threshold_rel: 0.15,
            backup_count: 3,
            min_consistency: 0.5,
        }
    }
}

impl PlateauConfig {
    pub fn validate(&self) -> Result<(), PlateauError> {
        if self.k_neighbors == 0 {
            return Err(PlateauError::InvalidConfig("k_neighbors must be >= 1".into()));
        }
        if !self.score_threshold_rel.is_finite() || self.score_threshold_rel < 0.0 {
            return Err(PlateauError::InvalidConfig(
                "score_threshold_rel must be finite and >= 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_consistency) {
            return Err(PlateauError::InvalidConfig(
                "min_consistency must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Per-candidate neighborhood diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborhoodStat {
    pub candidate_id: CandidateId,
    pub score: f64,
    /// Nearest first; distance ties broken by `candidate_id`.
    pub neighbors: Vec<CandidateId>,
    pub consistency: f64,
    pub dispersion: f64,
    pub neighborhood_median: f64,
    pub stability: f64,
    pub is_plateau: bool,
}

/// The stable neighborhood around the selected candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauRegion {
    pub members: BTreeSet<CandidateId>,
    pub stability_score: f64,
}

/// Outcome of one detector run over a fixed pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauReport {
    pub candidates_seen: usize,
    pub param_names: Vec<String>,
    /// Neighbors actually examined per candidate: `min(k_neighbors, candidates_seen - 1)`.
    pub k_neighbors: usize,
    pub score_threshold_rel: f64,
    pub selected_main: PlateauCandidate,
    pub selected_backup: Vec<PlateauCandidate>,
    pub plateau_region: PlateauRegion,
    /// Sorted by `candidate_id`.
    pub neighborhoods: Vec<NeighborhoodStat>,
}

/// Detect the most stable region with default backup count and consistency.
pub fn identify_plateau(
    candidates: &[PlateauCandidate],
    k_neighbors: usize,
    score_threshold_rel: f64,
) -> Result<PlateauReport, PlateauError> {
    identify_plateau_with(
        candidates,
        &PlateauConfig {
            k_neighbors,
            score_threshold_rel,
            ..PlateauConfig::default()
        },
    )
}

/// Detect the most stable region.
pub fn identify_plateau_with(
    candidates: &[PlateauCandidate],
    config: &PlateauConfig,
) -> Result<PlateauReport, PlateauError> {
    config.validate()?;
    if candidates.is_empty() {
        return Err(PlateauError::EmptyPool);
    }

    let mut pool = candidates.to_vec();
    pool.sort_by(|a, b| a.candidate_id.cmp(&b.candidate_id));
    if let Some(dup) = pool.windows(2).find(|w| w[0].candidate_id == w[1].candidate_id) {
        return Err(PlateauError::DuplicateCandidate(dup[0].candidate_id.clone()));
    }
    if let Some(bad) = pool.iter().find(|c| !c.score.is_finite()) {
        return Err(PlateauError::NonFiniteScore(bad.candidate_id.clone()));
    }

    let space = ParamSpace::from_pool(&pool)?;
    let n = pool.len();
    let k = config.k_neighbors.min(n - 1);

    let neighborhoods: Vec<NeighborhoodStat> = (0..n)
        .into_par_iter()
        .map(|i| neighborhood(i, &pool, &space, k, config))
        .collect();

    let mut ranking: Vec<usize> = (0..n).collect();
    ranking.sort_by(|&a, &b| rank_order(&neighborhoods[a], &neighborhoods[b]));

    let main_idx = ranking[0];
    let main_stat = &neighborhoods[main_idx];

    let mut members: BTreeSet<CandidateId> = main_stat
        .neighbors
        .iter()
        .filter(|id| {
            pool.binary_search_by(|c| c.candidate_id.cmp(*id))
                .map(|j| rel_dev(pool[j].score, main_stat.score) <= config.score_threshold_rel)
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    members.insert(main_stat.candidate_id.clone());

    let selected_backup: Vec<PlateauCandidate> = ranking
        .iter()
        .skip(1)
        .take(config.backup_count)
        .map(|&i| pool[i].clone())
        .collect();

    debug!(
        candidates = n,
        k,
        main = %main_stat.candidate_id,
        stability = main_stat.stability,
        region = members.len(),
        "plateau identified"
    );

    Ok(PlateauReport {
        candidates_seen: n,
        param_names: space.names().to_vec(),
        k_neighbors: k,
        score_threshold_rel: config.score_threshold_rel,
        selected_main: pool[main_idx].clone(),
        selected_backup,
        plateau_region: PlateauRegion {
            members,
            stability_score: main_stat.stability,
        },
        neighborhoods,
    })
}

fn rel_dev(score: f64, reference: f64) -> f64 {
    (score - reference).abs() / reference.abs().max(SCORE_EPSILON)
}

fn neighborhood(
    i: usize,
    pool: &[PlateauCandidate],
    space: &ParamSpace,
    k: usize,
    config: &PlateauConfig,
) -> NeighborhoodStat {
    let me = &pool[i];

    // Pool is sorted by id, so a stable sort on distance keeps id order within ties.
    let mut others: Vec<(f64, usize)> = (0..pool.len())
        .filter(|&j| j != i)
        .map(|j| (space.distance(me, &pool[j]), j))
        .collect();
    others.sort_by(|a, b| a.0.total_cmp(&b.0));
    others.truncate(k);

    let deviations: Vec<f64> = others.iter().map(|&(_, j)| rel_dev(pool[j].score, me.score)).collect();

    let (consistency, dispersion) = if deviations.is_empty() {
        (0.0, 0.0)
    } else {
        let within = deviations
            .iter()
            .filter(|&&d| d <= config.score_threshold_rel)
            .count();
        (within as f64 / deviations.len() as f64, median(&deviations))
    };

    let mut scores: Vec<f64> = others.iter().map(|&(_, j)| pool[j].score).collect();
    scores.push(me.score);

    NeighborhoodStat {
        candidate_id: me.candidate_id.clone(),
        score: me.score,
        neighbors: others.iter().map(|&(_, j)| pool[j].candidate_id.clone()).collect(),
        consistency,
        dispersion,
        neighborhood_median: median(&scores),
        stability: consistency / (1.0 + dispersion),
        is_plateau: !deviations.is_empty() && consistency >= config.min_consistency,
    }
}

/// Best first.
fn rank_order(a: &NeighborhoodStat, b: &NeighborhoodStat) -> Ordering {
    b.is_plateau
        .cmp(&a.is_plateau)
        .then_with(|| b.neighborhood_median.total_cmp(&a.neighborhood_median))
        .then_with(|| b.stability.total_cmp(&a.stability))
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.candidate_id.cmp(&b.candidate_id))
}
