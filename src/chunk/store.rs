//! Chunk directory naming and discovery.
//!
//! A branch directory holds one `<index:09>.chunk/` directory per chunk, each
//! with a `chunk.json` metadata file and the chunk's `data.log`.

use std::path::{Path, PathBuf};

use crate::chunk::ChunkInfo;
use crate::meta::{read_json, write_json};
use crate::{Error, Result};

pub const CHUNK_META_FILE: &str = "chunk.json";

/// Directory name of a chunk (e.g. "000000003.chunk").
pub fn chunk_dirname(index: u32) -> String {
    format!("{:09}.chunk", index)
}

pub fn chunk_path(branch_dir: &Path, index: u32) -> PathBuf {
    branch_dir.join(chunk_dirname(index))
}

/// Chunk index if `name` is a chunk directory name.
pub fn parse_chunk_dirname(name: &str) -> Option<u32> {
    let base = name.strip_suffix(".chunk")?;
    if base.len() != 9 || !base.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    base.parse::<u32>().ok()
}

pub fn write_chunk_meta(branch_dir: &Path, info: &ChunkInfo) -> Result<()> {
    let dir = chunk_path(branch_dir, info.index);
    std::fs::create_dir_all(&dir)?;
    write_json(&dir.join(CHUNK_META_FILE), info)
}

/// Load every chunk of a branch, sorted by index.
///
/// A chunk left open in front of a later chunk (interrupted rollover) is
/// closed at the later chunk's lower bound.
pub fn discover_chunks(branch_dir: &Path) -> Result<Vec<ChunkInfo>> {
    let mut indices = Vec::new();
    if !branch_dir.exists() {
        return Ok(Vec::new());
    }
    for entry in std::fs::read_dir(branch_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(parse_chunk_dirname) else {
            continue;
        };
        if !entry.path().join(CHUNK_META_FILE).exists() {
            // carry-forward written but rollover never completed
            log::warn!("ignoring {}: no {CHUNK_META_FILE}", entry.path().display());
            continue;
        }
        indices.push(index);
    }
    indices.sort_unstable();

    let mut chunks: Vec<ChunkInfo> = Vec::with_capacity(indices.len());
    for (position, index) in indices.into_iter().enumerate() {
        if index as usize != position {
            return Err(Error::CorruptState(format!(
                "{}: chunk {index} found at position {position}",
                branch_dir.display()
            )));
        }
        let info: ChunkInfo = read_json(&chunk_path(branch_dir, index).join(CHUNK_META_FILE))?;
        if info.index != index {
            return Err(Error::CorruptState(format!(
                "{}: chunk directory {index} holds metadata for chunk {}",
                branch_dir.display(),
                info.index
            )));
        }
        if let Some(previous) = chunks.last_mut() {
            match previous.valid_to {
                None => {
                    log::warn!(
                        "{}: closing chunk {} left open by an interrupted rollover",
                        branch_dir.display(),
                        previous.index
                    );
                    previous.valid_to = Some(info.valid_from);
                    write_chunk_meta(branch_dir, previous)?;
                }
                Some(end) if end != info.valid_from => {
                    return Err(Error::CorruptState(format!(
                        "{}: chunk {} ends at {end} but chunk {} starts at {}",
                        branch_dir.display(),
                        previous.index,
                        info.index,
                        info.valid_from
                    )));
                }
                Some(_) => {}
            }
        }
        chunks.push(info);
    }
    Ok(chunks)
}
