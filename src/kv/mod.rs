//! Ordered byte-key substrate.
//!
//! Each chunk is stored in one [`Environment`]: a set of named ordered stores
//! with snapshot-isolated [`ReadTxn`]s, buffered [`WriteTxn`]s and positioned
//! [`KvCursor`]s. The temporal layers above only rely on `get`, floor/higher
//! lookups and cursors.

mod cursor;
mod env;
mod mmap;
mod record;
mod txn;

pub use cursor::KvCursor;
pub use env::{Environment, Snapshot, LOG_FILE};
pub use txn::{ReadTxn, TxnPin, WriteTxn};
