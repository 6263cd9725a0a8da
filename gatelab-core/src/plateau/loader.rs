//! Candidate pool loading.
//!
//! Accepted shapes:
//! - a bare array of candidates;
//! - `{"topk": [...]}`;
//! - `{"plateau_candidates": [...]}`.
//!
//! Each candidate needs an id (`candidate_id`, `id` or `param_id`, string or
//! integer), a score (`score` or `final_score`) and a `params` object.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use super::{ParamValue, PlateauCandidate};
use crate::domain::CandidateId;

const ID_KEYS: [&str; 3] = ["candidate_id", "id", "param_id"];
const SCORE_KEYS: [&str; 2] = ["score", "final_score"];
const LIST_KEYS: [&str; 2] = ["topk", "plateau_candidates"];

#[derive(Debug, Error)]
pub enum CandidateLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected an array or an object with `topk` or `plateau_candidates`")]
    UnrecognizedShape,
    #[error("both `topk` and `plateau_candidates` are present")]
    AmbiguousShape,
    #[error("candidate #{index}: {message}")]
    InvalidCandidate { index: usize, message: String },
}

fn invalid(index: usize, message: impl Into<String>) -> CandidateLoadError {
    CandidateLoadError::InvalidCandidate {
        index,
        message: message.into(),
    }
}

/// Extract the candidate list from an already parsed document.
pub fn parse_candidates(doc: &Value) -> Result<Vec<PlateauCandidate>, CandidateLoadError> {
    let items = match doc {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut found = LIST_KEYS.iter().filter_map(|k| map.get(*k));
            match (found.next(), found.next()) {
                (Some(_), Some(_)) => return Err(CandidateLoadError::AmbiguousShape),
                (Some(Value::Array(items)), None) => items,
                _ => return Err(CandidateLoadError::UnrecognizedShape),
            }
        }
        _ => return Err(CandidateLoadError::UnrecognizedShape),
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_one(index, item))
        .collect()
}

pub fn parse_candidates_str(text: &str) -> Result<Vec<PlateauCandidate>, CandidateLoadError> {
    parse_candidates(&serde_json::from_str(text)?)
}

pub fn load_candidates(path: &Path) -> Result<Vec<PlateauCandidate>, CandidateLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| CandidateLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_candidates_str(&text)
}

fn parse_one(index: usize, item: &Value) -> Result<PlateauCandidate, CandidateLoadError> {
    let obj = item
        .as_object()
        .ok_or_else(|| invalid(index, "not an object"))?;

    let id = ID_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .ok_or_else(|| invalid(index, "missing candidate_id"))?;
    let candidate_id = match id {
        Value::String(s) if !s.trim().is_empty() => CandidateId::new(s.as_str()),
        Value::Number(n) if n.is_u64() || n.is_i64() => CandidateId::new(n.to_string()),
        _ => return Err(invalid(index, "candidate_id must be a non-empty string or an integer")),
    };

    let score = SCORE_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(Value::as_f64)
        .ok_or_else(|| invalid(index, format!("`{candidate_id}` has no numeric score")))?;

    let params = match obj.get("params") {
        Some(Value::Object(raw)) => raw
            .iter()
            .map(|(name, v)| {
                let value = match v {
                    Value::Number(n) => n.as_f64().map(ParamValue::Number),
                    Value::Bool(b) => Some(ParamValue::Flag(*b)),
                    Value::String(s) => Some(ParamValue::Text(s.clone())),
                    _ => None,
                };
                value.map(|v| (name.clone(), v)).ok_or_else(|| {
                    invalid(
                        index,
                        format!("`{candidate_id}` parameter `{name}` must be a number, bool or string"),
                    )
                })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?,
        Some(_) => return Err(invalid(index, "`params` must be an object")),
        None => BTreeMap::new(),
    };

    Ok(PlateauCandidate {
        candidate_id,
        score,
        params,
    })
}
