use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-supplied, stable identity of a parameter-set candidate.
///
/// Ordering is lexicographic and is the tie-break used everywhere a ranking
/// must be deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub String);

impl CandidateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CandidateId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identity of one evaluation job (one candidate × one policy).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Job ids name artifact directories, so they must be a single plain path segment.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_ids_order_lexicographically() {
        let mut ids = vec![CandidateId::from("c10"), CandidateId::from("c02"), CandidateId::from("a")];
        ids.sort();
        assert_eq!(ids, vec![CandidateId::from("a"), CandidateId::from("c02"), CandidateId::from("c10")]);
    }

    #[test]
    fn candidate_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&CandidateId::from("p-7")).unwrap();
        assert_eq!(json, "\"p-7\"");
    }

    #[test]
    fn job_id_path_safety() {
        assert!(JobId::new("job-2024_01.a").is_path_safe());
        assert!(!JobId::new("").is_path_safe());
        assert!(!JobId::new("..").is_path_safe());
        assert!(!JobId::new("a/b").is_path_safe());
        assert!(!JobId::new("a\\b").is_path_safe());
    }
}
