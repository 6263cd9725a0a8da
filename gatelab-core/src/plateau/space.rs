//! Parameter-space geometry for the plateau detector.
//!
//! Distance is a normalized Euclidean metric:
//! - numeric parameters contribute `|a - b| / range`, where `range` is the
//!   spread of that parameter across the whole pool (0 when constant);
//! - boolean and text parameters contribute 0 when equal, 1 otherwise;
//! - the sum of squares is divided by the parameter count before the root,
//!   so distances live in [0, 1] regardless of dimensionality.

use std::collections::BTreeMap;

use super::{ParamValue, PlateauCandidate, PlateauError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Number,
    Flag,
    Text,
}

fn kind_of(value: &ParamValue) -> ParamKind {
    match value {
        ParamValue::Number(_) => ParamKind::Number,
        ParamValue::Flag(_) => ParamKind::Flag,
        ParamValue::Text(_) => ParamKind::Text,
    }
}

/// Per-parameter normalization derived from the pool.
#[derive(Debug, Clone)]
pub(crate) struct ParamSpace {
    names: Vec<String>,
    /// `Some(range)` for numeric parameters, `None` for categorical ones.
    ranges: Vec<Option<f64>>,
}

impl ParamSpace {
    /// Check that every candidate carries the same parameters with consistent kinds.
    pub(crate) fn from_pool(pool: &[PlateauCandidate]) -> Result<Self, PlateauError> {
        let first = pool.first().ok_or(PlateauError::EmptyPool)?;
        let names: Vec<String> = first.params.keys().cloned().collect();
        let kinds: BTreeMap<&str, ParamKind> = first
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), kind_of(value)))
            .collect();

        for candidate in pool {
            let found: Vec<String> = candidate.params.keys().cloned().collect();
            if found != names {
                return Err(PlateauError::InconsistentParams {
                    candidate_id: candidate.candidate_id.clone(),
                    expected: names.clone(),
                    found,
                });
            }
            for (name, value) in &candidate.params {
                if kinds.get(name.as_str()) != Some(&kind_of(value)) {
                    return Err(PlateauError::MixedParamKinds { name: name.clone() });
                }
                if let ParamValue::Number(v) = value {
                    if !v.is_finite() {
                        return Err(PlateauError::NonFiniteParam {
                            candidate_id: candidate.candidate_id.clone(),
                            name: name.clone(),
                        });
                    }
                }
            }
        }

        let ranges = names
            .iter()
            .map(|name| match kinds.get(name.as_str()) {
                Some(ParamKind::Number) => {
                    let (lo, hi) = pool
                        .iter()
                        .filter_map(|c| c.params.get(name).and_then(ParamValue::as_f64))
                        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                            (lo.min(v), hi.max(v))
                        });
                    Some(hi - lo)
                }
                _ => None,
            })
            .collect();

        Ok(Self { names, ranges })
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    /// Normalized distance in [0, 1].
    pub(crate) fn distance(&self, a: &PlateauCandidate, b: &PlateauCandidate) -> f64 {
        if self.names.is_empty() {
            return 0.0;
        }

        let sum_sq: f64 = self
            .names
            .iter()
            .zip(&self.ranges)
            .map(|(name, range)| {
                let (Some(va), Some(vb)) = (a.params.get(name), b.params.get(name)) else {
                    return 1.0;
                };
                let d = match (range, va, vb) {
                    (Some(range), ParamValue::Number(x), ParamValue::Number(y)) => {
                        if *range > 0.0 {
                            (x - y).abs() / range
                        } else {
                            0.0
                        }
                    }
                    _ => {
                        if va == vb {
                            0.0
                        } else {
                            1.0
                        }
                    }
                };
                d * d
            })
            .sum();

        (sum_sq / self.names.len() as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CandidateId;

    fn cand(id: &str, params: &[(&str, ParamValue)]) -> PlateauCandidate {
        PlateauCandidate {
            candidate_id: CandidateId::from(id),
            score: 1.0,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn numeric_distance_is_range_normalized() {
        let pool = vec![
            cand("a", &[("fast", ParamValue::Number(10.0)), ("slow", ParamValue::Number(100.0))]),
            cand("b", &[("fast", ParamValue::Number(20.0)), ("slow", ParamValue::Number(100.0))]),
            cand("c", &[("fast", ParamValue::Number(30.0)), ("slow", ParamValue::Number(200.0))]),
        ];
        let space = ParamSpace::from_pool(&pool).unwrap();
        // fast: 10/20 = 0.5, slow: 0 → sqrt(0.25 / 2)
        let d = space.distance(&pool[0], &pool[1]);
        assert!((d - (0.125f64).sqrt()).abs() < 1e-12);
        assert_eq!(space.distance(&pool[0], &pool[0]), 0.0);
        assert!((space.distance(&pool[0], &pool[2]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn categorical_params_are_match_or_mismatch() {
        let pool = vec![
            cand("a", &[("mode", ParamValue::Text("fast".into())), ("long", ParamValue::Flag(true))]),
            cand("b", &[("mode", ParamValue::Text("slow".into())), ("long", ParamValue::Flag(true))]),
        ];
        let space = ParamSpace::from_pool(&pool).unwrap();
        assert!((space.distance(&pool[0], &pool[1]) - (0.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn inconsistent_param_sets_are_rejected() {
        let pool = vec![
            cand("a", &[("fast", ParamValue::Number(1.0))]),
            cand("b", &[("slow", ParamValue::Number(1.0))]),
        ];
        assert!(matches!(
            ParamSpace::from_pool(&pool),
            Err(PlateauError::InconsistentParams { .. })
        ));
    }

    #[test]
    fn mixed_kinds_are_rejected() {
        let pool = vec![
            cand("a", &[("fast", ParamValue::Number(1.0))]),
            cand("b", &[("fast", ParamValue::Text("1".into()))]),
        ];
        assert!(matches!(
            ParamSpace::from_pool(&pool),
            Err(PlateauError::MixedParamKinds { .. })
        ));
    }
}
