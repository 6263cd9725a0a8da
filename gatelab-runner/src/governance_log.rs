//! Governance log: JSONL append-only persistence of governance events.
//!
//! One `GovernanceItem` per line. Lines are only ever appended; the lifecycle
//! state of a candidate is recomputed by replaying its items through the
//! transition table, never stored.
//!
//! Unlike run history, a malformed line is an error: skipping it would change
//! the replayed state.
//!
//! Writers hold an exclusive advisory lock on `<log>.lock` across replay and
//! append, so separate handles and separate processes never interleave lines
//! or append against a stale state. Readers take the shared lock.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use thiserror::Error;
use tracing::{info, warn};

use gatelab_core::canonical::{to_canonical_string, CanonicalError};
use gatelab_core::governance::{
    current_state, EvidenceRef, GovernanceDecision, GovernanceItem, LifecycleState,
};
use gatelab_core::CandidateId;

#[derive(Debug, Error)]
pub enum GovernanceLogError {
    #[error("governance log i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("governance log {path} line {line} is malformed: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    #[error("governance log append lock poisoned")]
    Poisoned,
}

/// Result of recording one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub item: GovernanceItem,
    pub previous: LifecycleState,
    pub current: LifecycleState,
}

/// JSONL governance log manager.
///
/// The mutex orders appends from one handle; the file lock orders them across
/// handles and processes.
#[derive(Debug)]
pub struct GovernanceLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl GovernanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling advisory lock file, `<log>.lock`.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("governance"));
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn io_err(&self) -> impl FnOnce(io::Error) -> GovernanceLogError + '_ {
        move |source| GovernanceLogError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, GovernanceLogError> {
        self.append_lock
            .lock()
            .map_err(|_| GovernanceLogError::Poisoned)
    }

    /// Open and lock `<log>.lock`. Released when the returned file is dropped.
    fn file_lock(&self, exclusive: bool) -> Result<File, GovernanceLogError> {
        let lock_path = self.lock_path();
        let lock_err = |source| GovernanceLogError::Io {
            path: lock_path.clone(),
            source,
        };
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(lock_err)?;
        if exclusive {
            FileExt::lock_exclusive(&lock_file).map_err(lock_err)?;
        } else {
            FileExt::lock_shared(&lock_file).map_err(lock_err)?;
        }
        Ok(lock_file)
    }

    fn ensure_parent(&self) -> Result<(), GovernanceLogError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(self.io_err())?;
        }
        Ok(())
    }

    /// Append one item.
    pub fn append(&self, item: &GovernanceItem) -> Result<(), GovernanceLogError> {
        let _guard = self.lock()?;
        self.ensure_parent()?;
        let _file_lock = self.file_lock(true)?;
        self.append_locked(item)
    }

    /// Caller holds both locks.
    fn append_locked(&self, item: &GovernanceItem) -> Result<(), GovernanceLogError> {
        let mut line = to_canonical_string(item)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(self.io_err())?;
        file.write_all(line.as_bytes()).map_err(self.io_err())?;
        file.flush().map_err(self.io_err())?;

        info!(
            candidate_id = %item.candidate_id,
            decision = %item.decision,
            provenance_id = %item.provenance_id,
            "governance event appended"
        );
        Ok(())
    }

    /// Build, append and replay in one step.
    pub fn record(
        &self,
        candidate_id: CandidateId,
        decision: GovernanceDecision,
        reasons: Vec<String>,
        evidence: Vec<EvidenceRef>,
        created_at: DateTime<Utc>,
    ) -> Result<Transition, GovernanceLogError> {
        let _guard = self.lock()?;
        self.ensure_parent()?;
        let _file_lock = self.file_lock(true)?;

        let history: Vec<GovernanceItem> = self
            .read_unlocked()?
            .into_iter()
            .filter(|item| item.candidate_id == candidate_id)
            .collect();
        let previous = current_state(&history);
        if previous.is_terminal() {
            warn!(%candidate_id, %decision, "recording decision for a retired candidate");
        }
        let item = GovernanceItem::new(candidate_id, decision, reasons, evidence, created_at)?;
        self.append_locked(&item)?;
        let current = gatelab_core::governance::transition(previous, decision);
        Ok(Transition {
            item,
            previous,
            current,
        })
    }

    /// Every item in append order. A missing log is empty.
    pub fn read_all(&self) -> Result<Vec<GovernanceItem>, GovernanceLogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let _file_lock = self.file_lock(false)?;
        self.read_unlocked()
    }

    fn read_unlocked(&self) -> Result<Vec<GovernanceItem>, GovernanceLogError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err()(e)),
        };

        let mut items = Vec::new();
        for (index, line) in io::BufReader::new(file).lines().enumerate() {
            let line = line.map_err(self.io_err())?;
            if line.trim().is_empty() {
                continue;
            }
            let item = serde_json::from_str::<GovernanceItem>(&line).map_err(|e| {
                GovernanceLogError::Malformed {
                    path: self.path.clone(),
                    line: index + 1,
                    message: e.to_string(),
                }
            })?;
            items.push(item);
        }
        Ok(items)
    }

    /// One candidate's items in append order.
    pub fn history(&self, candidate_id: &CandidateId) -> Result<Vec<GovernanceItem>, GovernanceLogError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|item| &item.candidate_id == candidate_id)
            .collect())
    }

    /// Replay a candidate's history from `INCUBATION`.
    pub fn current_state(&self, candidate_id: &CandidateId) -> Result<LifecycleState, GovernanceLogError> {
        Ok(current_state(&self.history(candidate_id)?))
    }
}
