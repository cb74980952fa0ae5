use serde::{Deserialize, Serialize};

use crate::period::{Period, OPEN_END};
use crate::Result;

/// Lifecycle of a chunk. One-way: an open chunk is rolled over exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Open,
    RolledOver,
}

/// Metadata of one chunk, persisted as `chunk.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Position in the branch's chunk sequence, starting at 0.
    pub index: u32,

    /// First commit timestamp covered by this chunk.
    pub valid_from: i64,

    /// End of the covered commit timestamps, `None` while open.
    pub valid_to: Option<i64>,

    /// Commit time at which the chunk was created.
    pub created_at: i64,
}

impl ChunkInfo {
    pub fn new(index: u32, valid_from: i64, created_at: i64) -> Self {
        Self {
            index,
            valid_from,
            valid_to: None,
            created_at,
        }
    }

    pub fn state(&self) -> ChunkState {
        match self.valid_to {
            None => ChunkState::Open,
            Some(_) => ChunkState::RolledOver,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChunkState::Open
    }

    /// The first chunk of a branch is the only one without carried-forward state.
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn period(&self) -> Result<Period> {
        Period::new(self.valid_from, self.valid_to.unwrap_or(OPEN_END))
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.valid_from && self.valid_to.map_or(true, |end| timestamp < end)
    }

    /// Timestamp of the carry-forward commit, if this chunk has one.
    pub fn carry_forward_timestamp(&self) -> Option<i64> {
        (!self.is_first()).then_some(self.valid_from)
    }
}
