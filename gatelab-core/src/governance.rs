//! Governance lifecycle: a pure transition table and append-only records.
//!
//! | prev       | KEEP      | FREEZE     | DROP    |
//! |------------|-----------|------------|---------|
//! | INCUBATION | CANDIDATE | INCUBATION | RETIRED |
//! | CANDIDATE  | LIVE      | CANDIDATE  | RETIRED |
//! | LIVE       | LIVE      | LIVE       | RETIRED |
//! | RETIRED    | RETIRED   | RETIRED    | RETIRED |
//!
//! The current state of a candidate is always [`replay`] over its ordered
//! history, starting from `INCUBATION`. Records are never edited in place.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical::{blake3_content_id, CanonicalError};
use crate::domain::CandidateId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GovernanceParseError {
    #[error("unknown governance decision `{0}` (expected KEEP, FREEZE or DROP)")]
    UnknownDecision(String),
    #[error("unknown lifecycle state `{0}`")]
    UnknownState(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceDecision {
    Keep,
    Freeze,
    Drop,
}

impl GovernanceDecision {
    pub const ALL: [GovernanceDecision; 3] = [Self::Keep, Self::Freeze, Self::Drop];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keep => "KEEP",
            Self::Freeze => "FREEZE",
            Self::Drop => "DROP",
        }
    }
}

impl fmt::Display for GovernanceDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for GovernanceDecision {
    type Err = GovernanceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GovernanceParseError::UnknownDecision(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    #[default]
    Incubation,
    Candidate,
    Live,
    /// Absorbing.
    Retired,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 4] = [
        Self::Incubation,
        Self::Candidate,
        Self::Live,
        Self::Retired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incubation => "INCUBATION",
            Self::Candidate => "CANDIDATE",
            Self::Live => "LIVE",
            Self::Retired => "RETIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Retired)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = GovernanceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GovernanceParseError::UnknownState(s.to_string()))
    }
}

/// Next lifecycle state.
pub fn transition(prev: LifecycleState, decision: GovernanceDecision) -> LifecycleState {
    use GovernanceDecision::*;
    use LifecycleState::*;

    match (prev, decision) {
        (Incubation, Keep) => Candidate,
        (Incubation, Freeze) => Incubation,
        (Incubation, Drop) => Retired,
        (Candidate, Keep) => Live,
        (Candidate, Freeze) => Candidate,
        (Candidate, Drop) => Retired,
        (Live, Keep) => Live,
        (Live, Freeze) => Live,
        (Live, Drop) => Retired,
        (Retired, Keep) => Retired,
        (Retired, Freeze) => Retired,
        (Retired, Drop) => Retired,
    }
}

/// Fold decisions in order, starting from `INCUBATION`.
pub fn replay<I>(decisions: I) -> LifecycleState
where
    I: IntoIterator<Item = GovernanceDecision>,
{
    decisions
        .into_iter()
        .fold(LifecycleState::Incubation, transition)
}

/// Pointer to a file backing a governance decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// e.g. `governance_summary`, `scoring_breakdown`, `plateau_report`.
    pub kind: String,
    pub path: String,
    /// Content hash of the file at the time it was referenced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// One appended governance event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceItem {
    pub candidate_id: CandidateId,
    pub decision: GovernanceDecision,
    pub reasons: Vec<String>,
    pub evidence: Vec<EvidenceRef>,
    pub created_at: DateTime<Utc>,
    pub provenance_id: String,
    /// Producer-specific fields carried through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct ProvenanceKey<'a> {
    candidate_id: &'a CandidateId,
    decision: GovernanceDecision,
    reasons: &'a [String],
    evidence: &'a [EvidenceRef],
    created_at: &'a DateTime<Utc>,
}

impl GovernanceItem {
    /// Build an item and derive its provenance id from the identity fields.
    pub fn new(
        candidate_id: CandidateId,
        decision: GovernanceDecision,
        reasons: Vec<String>,
        evidence: Vec<EvidenceRef>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CanonicalError> {
        let provenance_id = blake3_content_id(&ProvenanceKey {
            candidate_id: &candidate_id,
            decision,
            reasons: &reasons,
            evidence: &evidence,
            created_at: &created_at,
        })?;
        Ok(Self {
            candidate_id,
            decision,
            reasons,
            evidence,
            created_at,
            provenance_id,
            extra: BTreeMap::new(),
        })
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Current state of one candidate, given its items in append order.
pub fn current_state<'a, I>(items: I) -> LifecycleState
where
    I: IntoIterator<Item = &'a GovernanceItem>,
{
    replay(items.into_iter().map(|item| item.decision))
}
