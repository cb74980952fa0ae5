//! Branch tree and per-branch chunk sequences.
//!
//! Every branch lives in `branches/<name>/` with a `branch.json` and its chunk
//! directories. `master` is the root; every other branch forks from a parent
//! at an immutable branching timestamp.

mod manager;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};

pub use manager::{BranchManager, Level};

use crate::chunk::{ChunkInfo, ChunkSequence};
use crate::meta::write_json;
use crate::{Error, Result};

pub const MASTER: &str = "master";
pub const BRANCHES_DIR: &str = "branches";
pub const BRANCH_META_FILE: &str = "branch.json";

/// Persisted description of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,

    /// `None` only for the root branch.
    pub parent: Option<String>,

    /// Parent timestamp the branch forked at; 0 for the root.
    pub branching_timestamp: i64,

    /// Timestamp of the latest commit, initially the branching timestamp.
    pub now: i64,
}

/// Branch names become directory names: `[A-Za-z0-9_.-]+`, not `.`/`..`.
pub fn validate_branch_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if name.is_empty() || !valid_chars || name == "." || name == ".." {
        return Err(Error::precondition(format!("invalid branch name {name:?}")));
    }
    Ok(())
}

struct BranchState {
    now: i64,
    chunks: ChunkSequence,
}

/// A loaded branch.
pub struct Branch {
    name: String,
    parent: Option<String>,
    branching_timestamp: i64,
    dir: PathBuf,
    state: RwLock<BranchState>,
    writes: Mutex<()>,
}

impl Branch {
    fn new(info: BranchInfo, dir: PathBuf, chunks: ChunkSequence) -> Self {
        Self {
            name: info.name,
            parent: info.parent,
            branching_timestamp: info.branching_timestamp,
            dir,
            state: RwLock::new(BranchState {
                now: info.now,
                chunks,
            }),
            writes: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn branching_timestamp(&self) -> i64 {
        self.branching_timestamp
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, BranchState>> {
        self.state
            .read()
            .map_err(|_| Error::Closed("branch state lock poisoned"))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, BranchState>> {
        self.state
            .write()
            .map_err(|_| Error::Closed("branch state lock poisoned"))
    }

    pub fn now(&self) -> Result<i64> {
        Ok(self.read_state()?.now)
    }

    pub fn info(&self) -> Result<BranchInfo> {
        Ok(BranchInfo {
            name: self.name.clone(),
            parent: self.parent.clone(),
            branching_timestamp: self.branching_timestamp,
            now: self.now()?,
        })
    }

    /// Copy of the chunk sequence as of now.
    pub fn chunks(&self) -> Result<ChunkSequence> {
        Ok(self.read_state()?.chunks.clone())
    }

    /// Serializes writers of this branch.
    pub(crate) fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        self.writes
            .lock()
            .map_err(|_| Error::Closed("branch write lock poisoned"))
    }

    /// Record a commit at `timestamp` as the branch's latest.
    pub(crate) fn advance_now(&self, timestamp: i64) -> Result<()> {
        let mut state = self.write_state()?;
        if timestamp <= state.now {
            return Err(Error::precondition(format!(
                "commit at {timestamp} does not follow branch {} now {}",
                self.name, state.now
            )));
        }
        state.now = timestamp;
        let info = BranchInfo {
            name: self.name.clone(),
            parent: self.parent.clone(),
            branching_timestamp: self.branching_timestamp,
            now: timestamp,
        };
        write_json(&self.dir.join(BRANCH_META_FILE), &info)
    }

    /// Close the active chunk at `timestamp` and open the next one.
    pub(crate) fn roll(&self, timestamp: i64, created_at: i64) -> Result<ChunkInfo> {
        let mut state = self.write_state()?;
        let next = state.chunks.roll(timestamp, created_at)?;
        log::info!(
            "branch {} rolled over to chunk {} at {timestamp}",
            self.name,
            next.index
        );
        Ok(next)
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("branching_timestamp", &self.branching_timestamp)
            .finish()
    }
}
