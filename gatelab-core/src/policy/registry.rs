//! Sandboxed policy registry.
//!
//! The registry is the single chokepoint between a selector string and a
//! policy file on disk. Selectors are either a built-in alias (`default`,
//! `red_team`) or a file name with a declared extension relative to the
//! policy directory. Everything else is rejected before any file is opened.
//!
//! Containment is checked after canonicalization, so symlinks that point out
//! of the policy directory are rejected just like `..` segments.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::schema::{LoadedPolicy, PolicyFormat, PolicyValidationError};

/// Built-in aliases and the file each one names inside the policy directory.
pub const BUILTIN_ALIASES: [(&str, &str); 2] =
    [("default", "default.toml"), ("red_team", "red_team.toml")];

#[derive(Debug, Error)]
pub enum PolicySelectorError {
    #[error("policy selector is empty")]
    Empty,
    #[error("policy selector `{0}` is an absolute path")]
    AbsolutePath(String),
    #[error("policy selector `{0}` contains a `..` segment")]
    PathTraversal(String),
    #[error("policy selector `{0}` contains invalid characters")]
    InvalidCharacters(String),
    #[error("unknown policy alias `{0}`")]
    UnknownAlias(String),
    #[error("policy selector `{selector}` has unsupported extension (expected one of: {expected})")]
    UnsupportedExtension { selector: String, expected: String },
    #[error("policy `{0}` not found")]
    NotFound(String),
    #[error("policy `{0}` is not a regular file")]
    NotAFile(String),
    #[error("policy `{selector}` resolves outside the policy directory")]
    OutsideSandbox { selector: String },
    #[error("policy directory `{path}` is unavailable: {source}")]
    PolicyDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error resolving `{selector}`: {source}")]
    Io {
        selector: String,
        #[source]
        source: std::io::Error,
    },
}

/// Anything that can go wrong between a selector and a validated policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Selector(#[from] PolicySelectorError),
    #[error(transparent)]
    Validation(#[from] PolicyValidationError),
}

/// One row of [`PolicyRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub selector: String,
    /// File name relative to the policy directory.
    pub resolved_source: String,
    /// Canonical `sha256:` fingerprint of the validated document.
    pub content_hash: String,
}

/// Immutable, explicitly constructed policy registry.
///
/// Holds no cache: every `load` re-reads and re-fingerprints the file, so two
/// loads of the same bytes always agree and tests never leak state.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    root: PathBuf,
}

impl PolicyRegistry {
    /// Open a registry rooted at `policy_dir`. The directory must exist.
    pub fn new(policy_dir: impl AsRef<Path>) -> Result<Self, PolicySelectorError> {
        let path = policy_dir.as_ref();
        let root = path
            .canonicalize()
            .map_err(|source| PolicySelectorError::PolicyDirUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        if !root.is_dir() {
            return Err(PolicySelectorError::PolicyDirUnavailable {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
            });
        }
        Ok(Self { root })
    }

    /// Canonical policy directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a selector to a canonical path inside the policy directory.
    pub fn resolve(&self, selector: &str) -> Result<PathBuf, PolicySelectorError> {
        let file_name = match check_selector(selector) {
            Ok(name) => name,
            Err(e) => {
                warn!(selector, error = %e, "policy selector rejected");
                return Err(e);
            }
        };

        let candidate = self.root.join(&file_name);
        let resolved = candidate.canonicalize().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                PolicySelectorError::NotFound(selector.to_string())
            } else {
                PolicySelectorError::Io {
                    selector: selector.to_string(),
                    source,
                }
            }
        })?;

        if !resolved.starts_with(&self.root) {
            warn!(selector, resolved = %resolved.display(), "policy resolves outside sandbox");
            return Err(PolicySelectorError::OutsideSandbox {
                selector: selector.to_string(),
            });
        }
        if !resolved.is_file() {
            return Err(PolicySelectorError::NotAFile(selector.to_string()));
        }

        debug!(selector, resolved = %resolved.display(), "policy resolved");
        Ok(resolved)
    }

    /// Resolve, read, validate and fingerprint a policy.
    pub fn load(&self, selector: &str) -> Result<LoadedPolicy, PolicyError> {
        let path = self.resolve(selector)?;
        let policy = LoadedPolicy::load(selector, &path)?;
        debug!(selector, fingerprint = policy.fingerprint(), "policy loaded");
        Ok(policy)
    }

    /// Every available policy, sorted by selector.
    ///
    /// Aliases are listed under their alias name; other policy files under
    /// their file name. Any invalid policy fails the whole listing.
    pub fn list(&self) -> Result<Vec<PolicyEntry>, PolicyError> {
        Ok(self
            .load_all()?
            .iter()
            .map(|policy| PolicyEntry {
                selector: policy.selector().to_string(),
                resolved_source: self.relative_source(policy),
                content_hash: policy.fingerprint().to_string(),
            })
            .collect())
    }

    /// Load every available policy once, sorted by selector.
    pub fn load_all(&self) -> Result<Vec<LoadedPolicy>, PolicyError> {
        self.selectors()?
            .iter()
            .map(|selector| self.load(selector))
            .collect()
    }

    /// Source file of `policy` relative to the policy directory.
    pub fn relative_source(&self, policy: &LoadedPolicy) -> String {
        policy
            .source()
            .strip_prefix(&self.root)
            .unwrap_or(policy.source())
            .to_string_lossy()
            .into_owned()
    }

    fn selectors(&self) -> Result<Vec<String>, PolicyError> {
        let mut selectors = Vec::new();

        for (alias, file) in BUILTIN_ALIASES {
            if self.root.join(file).is_file() {
                selectors.push(alias.to_string());
            }
        }

        let read_dir = std::fs::read_dir(&self.root).map_err(|source| {
            PolicySelectorError::PolicyDirUnavailable {
                path: self.root.clone(),
                source,
            }
        })?;
        for entry in read_dir {
            let entry = entry.map_err(|source| PolicySelectorError::PolicyDirUnavailable {
                path: self.root.clone(),
                source,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || PolicyFormat::from_path(Path::new(&name)).is_none() {
                continue;
            }
            if BUILTIN_ALIASES.iter().any(|(_, file)| *file == name) {
                continue;
            }
            if entry.path().is_file() {
                selectors.push(name);
            }
        }

        selectors.sort();
        Ok(selectors)
    }
}

/// Purely lexical checks, run before touching the filesystem.
///
/// Returns the file name to look up inside the policy directory.
fn check_selector(selector: &str) -> Result<String, PolicySelectorError> {
    if selector.trim().is_empty() {
        return Err(PolicySelectorError::Empty);
    }
    if selector.contains('\0') {
        return Err(PolicySelectorError::InvalidCharacters(selector.to_string()));
    }
    if is_absolute_like(selector) {
        return Err(PolicySelectorError::AbsolutePath(selector.to_string()));
    }
    // Both separators are checked so a Windows-style selector is refused on any host.
    if selector.split(['/', '\\']).any(|segment| segment == "..")
        || Path::new(selector)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(PolicySelectorError::PathTraversal(selector.to_string()));
    }

    if let Some(ext) = Path::new(selector).extension().and_then(|e| e.to_str()) {
        if PolicyFormat::from_extension(ext).is_some() {
            return Ok(selector.to_string());
        }
        if !selector.contains(['/', '\\']) && lookup_alias(selector).is_none() {
            return Err(PolicySelectorError::UnsupportedExtension {
                selector: selector.to_string(),
                expected: PolicyFormat::EXTENSIONS.join(", "),
            });
        }
    }

    lookup_alias(selector)
        .map(str::to_string)
        .ok_or_else(|| PolicySelectorError::UnknownAlias(selector.to_string()))
}

fn lookup_alias(selector: &str) -> Option<&'static str> {
    BUILTIN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == selector)
        .map(|(_, file)| *file)
}

fn is_absolute_like(selector: &str) -> bool {
    let bytes = selector.as_bytes();
    Path::new(selector).is_absolute()
        || selector.starts_with('/')
        || selector.starts_with('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}
