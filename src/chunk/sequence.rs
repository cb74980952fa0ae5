use std::path::{Path, PathBuf};

use crate::chunk::store::{chunk_path, discover_chunks, write_chunk_meta};
use crate::chunk::ChunkInfo;
use crate::period::Period;
use crate::{Error, Result};

/// Ordered chunks of one branch. The last chunk is the open one.
#[derive(Debug, Clone)]
pub struct ChunkSequence {
    branch_dir: PathBuf,
    chunks: Vec<ChunkInfo>,
}

impl ChunkSequence {
    /// Start a sequence with chunk 0 covering `[valid_from, +inf)`.
    pub fn create(branch_dir: impl Into<PathBuf>, valid_from: i64, created_at: i64) -> Result<Self> {
        let branch_dir = branch_dir.into();
        let first = ChunkInfo::new(0, valid_from, created_at);
        write_chunk_meta(&branch_dir, &first)?;
        log::debug!("created chunk 0 of {} at {valid_from}", branch_dir.display());
        Ok(Self {
            branch_dir,
            chunks: vec![first],
        })
    }

    pub fn load(branch_dir: impl Into<PathBuf>) -> Result<Self> {
        let branch_dir = branch_dir.into();
        let chunks = discover_chunks(&branch_dir)?;
        match chunks.last() {
            None => {
                return Err(Error::CorruptState(format!(
                    "{}: branch has no chunks",
                    branch_dir.display()
                )))
            }
            Some(last) if !last.is_open() => {
                return Err(Error::CorruptState(format!(
                    "{}: last chunk {} is not open",
                    branch_dir.display(),
                    last.index
                )))
            }
            Some(_) => {}
        }
        Ok(Self { branch_dir, chunks })
    }

    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    pub fn active(&self) -> &ChunkInfo {
        // never empty: `create` and `load` both guarantee one chunk
        &self.chunks[self.chunks.len() - 1]
    }

    pub fn first(&self) -> &ChunkInfo {
        &self.chunks[0]
    }

    pub fn path_of(&self, chunk: &ChunkInfo) -> PathBuf {
        chunk_path(&self.branch_dir, chunk.index)
    }

    pub fn branch_dir(&self) -> &Path {
        &self.branch_dir
    }

    /// Chunk whose period contains `timestamp`; `None` before the first chunk.
    pub fn chunk_for(&self, timestamp: i64) -> Option<&ChunkInfo> {
        let position = self
            .chunks
            .partition_point(|chunk| chunk.valid_from <= timestamp);
        position
            .checked_sub(1)
            .map(|i| &self.chunks[i])
            .filter(|chunk| chunk.contains(timestamp))
    }

    /// Chunks overlapping `period`, ascending.
    pub fn chunks_in(&self, period: &Period) -> Vec<&ChunkInfo> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.period().map_or(false, |p| p.overlaps(period)))
            .collect()
    }

    /// Close the active chunk at `timestamp` and open the next one from there.
    pub fn roll(&mut self, timestamp: i64, created_at: i64) -> Result<ChunkInfo> {
        let active = self.active().clone();
        if timestamp <= active.valid_from {
            return Err(Error::precondition(format!(
                "rollover at {timestamp} does not follow chunk {} start {}",
                active.index, active.valid_from
            )));
        }
        let next = ChunkInfo::new(active.index + 1, timestamp, created_at);
        write_chunk_meta(&self.branch_dir, &next)?;

        let mut closed = active;
        closed.valid_to = Some(timestamp);
        write_chunk_meta(&self.branch_dir, &closed)?;

        let last = self.chunks.len() - 1;
        self.chunks[last] = closed;
        self.chunks.push(next.clone());
        Ok(next)
    }
}
