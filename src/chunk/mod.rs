//! Chunks: bounded, time-ordered storage units of one branch.
//!
//! Chunk periods within a branch are contiguous and ascending. Only the last
//! chunk is open for writes; rollover closes it and opens the next one.

mod info;
mod policy;
mod sequence;
mod store;

pub use info::{ChunkInfo, ChunkState};
pub use policy::{should_rollover, ChunkStats};
pub use sequence::ChunkSequence;
pub use store::{chunk_dirname, chunk_path, discover_chunks, parse_chunk_dirname, CHUNK_META_FILE};
