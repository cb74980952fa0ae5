//! Temporal, branchable key-value storage engine.
//!
//! Every write is versioned by a commit timestamp and every branch forks from
//! its parent at a fixed timestamp. Reads ask for a key's value at a time on a
//! branch and get back the value together with the period it holds for.
//! Secondary index scans merge a branch's own entries with the view of its
//! ancestors at the fork.

pub mod batch;
pub mod branch;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod error;
pub mod index;
pub mod key;
pub mod kv;
mod meta;
pub mod period;
pub mod pool;
pub mod resolver;
pub mod store;
pub mod timestamp;

pub use batch::{IndexChange, Mutation, WriteBatch};
pub use branch::{BranchInfo, MASTER};
pub use chunk::{ChunkInfo, ChunkState};
pub use clock::{Clock, ManualClock, QuantaClock, SystemClock};
pub use config::{PoolConfig, RolloverPolicy, StoreConfig};
pub use cursor::{CursorTracker, IndexScanCursor, Order, RawIndexCursor};
pub use error::{Error, Result};
pub use index::{IndexDefinition, IndexKind, IndexRange, IndexValue};
pub use key::TemporalKey;
pub use period::{Period, OPEN_END};
pub use pool::{EnvironmentManager, PoolStats, SweepReport};
pub use resolver::GetResult;
pub use store::TemporalStore;
pub use timestamp::CommitTimestampProvider;
