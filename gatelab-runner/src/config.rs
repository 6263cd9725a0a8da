//! Runner configuration, loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration. Relative directories are resolved against the directory
//! holding the config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatelab_core::anchors::ModeBConfig;
use gatelab_core::canonical::{blake3_content_id, CanonicalError};
use gatelab_core::plateau::PlateauConfig;
use gatelab_core::scoring::ScoringGuardConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid [{section}] configuration: {message}")]
    Invalid { section: &'static str, message: String },
    #[error("config cannot be hashed: {0}")]
    Hash(#[from] CanonicalError),
}

/// Top-level runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatelabConfig {
    /// Sandbox directory holding policy documents.
    pub policy_dir: PathBuf,
    /// Root directory for per-job audit artifacts.
    pub output_dir: PathBuf,
    /// `false` puts the engine in advisory mode: failures are recorded, never rejected.
    pub enforce_policy: bool,
    pub guards: ScoringGuardConfig,
    pub plateau: PlateauConfig,
    pub mode_b: ModeBConfig,
}

impl Default for GatelabConfig {
    fn default() -> Self {
        Self {
            policy_dir: PathBuf::from("policies"),
            output_dir: PathBuf::from("artifacts"),
            enforce_policy: true,
            guards: ScoringGuardConfig::default(),
            plateau: PlateauConfig::default(),
            mode_b: ModeBConfig::default(),
        }
    }
}

impl GatelabConfig {
    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; relative directories become relative to its parent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.relative_to(base))
    }

    /// Resolve relative `policy_dir` / `output_dir` against `base`.
    pub fn relative_to(mut self, base: &Path) -> Self {
        if self.policy_dir.is_relative() {
            self.policy_dir = base.join(&self.policy_dir);
        }
        if self.output_dir.is_relative() {
            self.output_dir = base.join(&self.output_dir);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.guards.validate().map_err(|e| ConfigError::Invalid {
            section: "guards",
            message: e.to_string(),
        })?;
        self.plateau.validate().map_err(|e| ConfigError::Invalid {
            section: "plateau",
            message: e.to_string(),
        })?;
        self.mode_b.validate().map_err(|e| ConfigError::Invalid {
            section: "mode_b",
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Deterministic BLAKE3 id of this configuration, recorded in audit artifacts.
    ///
    /// Hashes the canonical JSON form; a directory that is not valid UTF-8 has
    /// no such form and is an error.
    pub fn config_hash(&self) -> Result<String, ConfigError> {
        Ok(blake3_content_id(self)?)
    }
}
