//! Robust location/spread statistics and bimodality detection.
//!
//! Median and MAD rather than mean and standard deviation: the samples here
//! are small neighbor sets where one outlier would otherwise dominate.

use serde::{Deserialize, Serialize};

use super::guards::GuardError;

/// Smallest sample on which bimodality is evaluated at all.
pub const MIN_BIMODALITY_SAMPLE: usize = 4;

/// Linear-interpolation percentile over an already sorted slice. `p` in [0, 1].
pub(crate) fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    debug_assert!((0.0..=1.0).contains(&p));

    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let w = rank - lo as f64;
        sorted[lo] * (1.0 - w) + sorted[hi] * w
    }
}

pub(crate) fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

pub(crate) fn median(values: &[f64]) -> f64 {
    percentile_sorted(&sorted_copy(values), 0.5)
}

/// Median absolute deviation around the median.
pub(crate) fn mad(values: &[f64]) -> f64 {
    let m = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    median(&deviations)
}

/// Location and spread summary of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustStats {
    pub n: usize,
    pub median: f64,
    /// Median absolute deviation.
    pub mad: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub min: f64,
    pub max: f64,
}

/// Compute robust statistics. Empty or non-finite samples are rejected.
pub fn compute_robust_stats(sample: &[f64]) -> Result<RobustStats, GuardError> {
    check_sample(sample)?;

    let sorted = sorted_copy(sample);
    let q1 = percentile_sorted(&sorted, 0.25);
    let q3 = percentile_sorted(&sorted, 0.75);

    Ok(RobustStats {
        n: sorted.len(),
        median: percentile_sorted(&sorted, 0.5),
        mad: mad(&sorted),
        q1,
        q3,
        iqr: q3 - q1,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
    })
}

pub(crate) fn check_sample(sample: &[f64]) -> Result<(), GuardError> {
    if sample.is_empty() {
        return Err(GuardError::EmptySample);
    }
    if let Some((index, value)) = sample.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(GuardError::NonFiniteSample {
            index,
            value: *value,
        });
    }
    Ok(())
}

// ─── Bimodality ──────────────────────────────────────────────────────

/// Thresholds for the largest-gap cluster split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BimodalityConfig {
    /// Gap between clusters must be at least this multiple of the larger within-cluster MAD.
    pub gap_ratio: f64,
    /// Each cluster must hold at least this fraction of the sample (and never fewer than 2).
    pub min_cluster_fraction: f64,
}

impl Default for BimodalityConfig {
    fn default() -> Self {
        Self {
            gap_ratio: 3.0,
            min_cluster_fraction: 0.2,
        }
    }
}

/// Warning level attached to a bimodality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Warning,
}

/// Result of [`detect_bimodality_cluster`]. A warning, never a rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BimodalityCheck {
    pub is_bimodal: bool,
    pub severity: Severity,
    /// Midpoint of the widest admissible gap.
    pub split_value: Option<f64>,
    pub gap: Option<f64>,
    /// `gap / max(within-cluster MAD)`.
    pub separation: Option<f64>,
    pub low_cluster_size: usize,
    pub high_cluster_size: usize,
    pub notes: Vec<String>,
}

impl BimodalityCheck {
    fn not_evaluated(note: String) -> Self {
        Self {
            is_bimodal: false,
            severity: Severity::None,
            split_value: None,
            gap: None,
            separation: None,
            low_cluster_size: 0,
            high_cluster_size: 0,
            notes: vec![note],
        }
    }
}

/// Flag samples that split into two separated clusters.
///
/// Sort the sample, take the widest gap between neighbours that leaves both
/// sides at least `min_cluster_fraction` of the points, and compare the gap to
/// the larger of the two within-cluster MADs.
pub fn detect_bimodality_cluster(
    sample: &[f64],
    config: &BimodalityConfig,
) -> Result<BimodalityCheck, GuardError> {
    check_sample(sample)?;

    let n = sample.len();
    if n < MIN_BIMODALITY_SAMPLE {
        return Ok(BimodalityCheck::not_evaluated(format!(
            "bimodality not evaluated: sample of {n} < {MIN_BIMODALITY_SAMPLE}"
        )));
    }

    let sorted = sorted_copy(sample);
    let min_cluster = ((config.min_cluster_fraction * n as f64).ceil() as usize).max(2);
    if 2 * min_cluster > n {
        return Ok(BimodalityCheck::not_evaluated(format!(
            "bimodality not evaluated: sample of {n} cannot hold two clusters of {min_cluster}"
        )));
    }

    // Widest admissible gap; first one wins on ties.
    let (split, gap) = (min_cluster..=n - min_cluster)
        .map(|i| (i, sorted[i] - sorted[i - 1]))
        .fold((min_cluster, f64::NEG_INFINITY), |best, cur| {
            if cur.1 > best.1 {
                cur
            } else {
                best
            }
        });

    let (low, high) = sorted.split_at(split);
    let spread = mad(low).max(mad(high));
    let scale = sorted[0].abs().max(sorted[n - 1].abs()).max(1.0);
    let floor = 1e-9 * scale;

    let separation = gap / spread.max(floor);
    let is_bimodal = gap > floor && separation >= config.gap_ratio;
    let split_value = (sorted[split - 1] + sorted[split]) / 2.0;

    let notes = if is_bimodal {
        vec![format!(
            "bimodal sample: {} below / {} above {:.6} (gap {:.6}, separation {:.2}x)",
            low.len(),
            high.len(),
            split_value,
            gap,
            separation
        )]
    } else {
        Vec::new()
    };

    Ok(BimodalityCheck {
        is_bimodal,
        severity: if is_bimodal {
            Severity::Warning
        } else {
            Severity::None
        },
        split_value: Some(split_value),
        gap: Some(gap),
        separation: Some(separation),
        low_cluster_size: low.len(),
        high_cluster_size: high.len(),
        notes,
    })
}
