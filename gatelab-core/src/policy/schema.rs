//! Policy document schema and fail-closed validation.
//!
//! A policy is parsed and validated in one step. There is no partially-valid
//! document: any structural defect is a `PolicyValidationError` and nothing
//! downstream ever sees the document.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical::{sha256_fingerprint, CanonicalError};

/// The only schema version this engine understands.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PolicyValidationError {
    #[error("policy `{source_name}` is malformed: {message}")]
    Malformed { source_name: String, message: String },
    #[error("policy `{source_name}`: unsupported schema_version {found} (expected {expected})")]
    UnsupportedSchemaVersion {
        source_name: String,
        found: u32,
        expected: u32,
    },
    #[error("policy `{source_name}`: name must not be empty")]
    EmptyName { source_name: String },
    #[error("policy `{source_name}` declares no gates")]
    NoGates { source_name: String },
    #[error("policy `{source_name}`: gate #{index} has an empty metric name")]
    EmptyMetric { source_name: String, index: usize },
    #[error("policy `{source_name}`: gate #{index} ({metric}) has an empty fail_reason")]
    EmptyFailReason {
        source_name: String,
        index: usize,
        metric: String,
    },
    #[error("policy `{source_name}`: gate #{index} ({metric}) threshold is not finite")]
    NonFiniteThreshold {
        source_name: String,
        index: usize,
        metric: String,
    },
    #[error("policy `{source_name}` could not be read: {source}")]
    Io {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("policy `{source_name}` could not be fingerprinted: {source}")]
    Fingerprint {
        source_name: String,
        #[source]
        source: CanonicalError,
    },
}

// ─── Schema ──────────────────────────────────────────────────────────

/// Comparator applied as `observed <op> threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateOp {
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
}

impl GateOp {
    pub const ALL: [GateOp; 5] = [GateOp::Ge, GateOp::Le, GateOp::Gt, GateOp::Lt, GateOp::Eq];

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "==",
        }
    }

    /// `observed <op> threshold`.
    ///
    /// `==` compares with a relative tolerance of a few ULPs so a threshold
    /// written as `0.3` matches an observed `0.1 + 0.2`.
    pub fn compare(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::Ge => observed >= threshold,
            Self::Le => observed <= threshold,
            Self::Gt => observed > threshold,
            Self::Lt => observed < threshold,
            Self::Eq => {
                let scale = observed.abs().max(threshold.abs()).max(1.0);
                (observed - threshold).abs() <= 4.0 * f64::EPSILON * scale
            }
        }
    }
}

impl fmt::Display for GateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

fn default_enabled() -> bool {
    true
}

/// One hard gate: `metrics[metric] <op> threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSpec {
    pub metric: String,
    pub op: GateOp,
    pub threshold: f64,
    pub fail_reason: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Evaluation mode switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyModes {
    pub mode_b_enabled: bool,
    pub scoring_guards_enabled: bool,
}

/// Declarative policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub modes: PolicyModes,
    pub gates: Vec<GateSpec>,
}

/// On-disk encodings a policy may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFormat {
    Toml,
    Json,
}

impl PolicyFormat {
    /// Declared policy file extensions, in lookup order.
    pub const EXTENSIONS: [&'static str; 2] = ["toml", "json"];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl PolicyDocument {
    /// Parse and validate policy text.
    ///
    /// `source_name` is only used to label errors.
    pub fn parse(
        text: &str,
        format: PolicyFormat,
        source_name: &str,
    ) -> Result<Self, PolicyValidationError> {
        let malformed = |message: String| PolicyValidationError::Malformed {
            source_name: source_name.to_string(),
            message,
        };

        let doc: PolicyDocument = match format {
            PolicyFormat::Toml => toml::from_str(text).map_err(|e| malformed(e.message().to_string()))?,
            PolicyFormat::Json => serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?,
        };
        doc.validate(source_name)?;
        Ok(doc)
    }

    /// Structural checks serde cannot express.
    pub fn validate(&self, source_name: &str) -> Result<(), PolicyValidationError> {
        let source_name = source_name.to_string();

        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(PolicyValidationError::UnsupportedSchemaVersion {
                source_name,
                found: self.schema_version,
                expected: SUPPORTED_SCHEMA_VERSION,
            });
        }
        if self.name.trim().is_empty() {
            return Err(PolicyValidationError::EmptyName { source_name });
        }
        if self.gates.is_empty() {
            return Err(PolicyValidationError::NoGates { source_name });
        }

        for (index, gate) in self.gates.iter().enumerate() {
            if gate.metric.trim().is_empty() {
                return Err(PolicyValidationError::EmptyMetric { source_name, index });
            }
            if gate.fail_reason.trim().is_empty() {
                return Err(PolicyValidationError::EmptyFailReason {
                    source_name,
                    index,
                    metric: gate.metric.clone(),
                });
            }
            if !gate.threshold.is_finite() {
                return Err(PolicyValidationError::NonFiniteThreshold {
                    source_name,
                    index,
                    metric: gate.metric.clone(),
                });
            }
        }

        Ok(())
    }

    /// `"sha256:" + hex` over the canonical serialization.
    ///
    /// Independent of source formatting and encoding: the same logical document
    /// written as TOML or JSON, in any field order, fingerprints identically.
    pub fn fingerprint(&self) -> Result<String, CanonicalError> {
        sha256_fingerprint(self)
    }

    /// Enabled gates, in document order.
    pub fn enabled_gates(&self) -> impl Iterator<Item = &GateSpec> {
        self.gates.iter().filter(|g| g.enabled)
    }
}

// ─── Loaded handle ───────────────────────────────────────────────────

/// A validated, fingerprinted policy as handed out by the registry.
///
/// Only the registry constructs these, so holding one proves the document
/// passed through the sandboxed resolver and the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPolicy {
    selector: String,
    source: PathBuf,
    document: PolicyDocument,
    fingerprint: String,
}

impl LoadedPolicy {
    /// Read, parse, validate and fingerprint a file the registry already resolved.
    pub(crate) fn load(selector: &str, path: &Path) -> Result<Self, PolicyValidationError> {
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| selector.to_string());

        let format = PolicyFormat::from_path(path).ok_or_else(|| PolicyValidationError::Malformed {
            source_name: source_name.clone(),
            message: "unrecognized policy file extension".into(),
        })?;

        let text = std::fs::read_to_string(path).map_err(|source| PolicyValidationError::Io {
            source_name: source_name.clone(),
            source,
        })?;

        let document = PolicyDocument::parse(&text, format, &source_name)?;
        let fingerprint = document
            .fingerprint()
            .map_err(|source| PolicyValidationError::Fingerprint {
                source_name: source_name.clone(),
                source,
            })?;

        Ok(Self {
            selector: selector.to_string(),
            source: path.to_path_buf(),
            document,
            fingerprint,
        })
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn modes(&self) -> PolicyModes {
        self.document.modes
    }
}
