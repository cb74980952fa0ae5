//! Index cursors.
//!
//! A [`RawIndexCursor`] walks the entries of one chunk's index store with
//! their validity periods. [`IndexScanCursor`]s yield the resolved view at a
//! timestamp and compose: a timestamp filter over a raw cursor at the root of
//! the branch tree, a [`DeltaCursor`] per descendant level, and predicate
//! filters on top.

mod delta;
mod raw;
mod scan;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

pub use delta::DeltaCursor;
pub use raw::ChunkIndexCursor;
pub use scan::{FilteringCursor, IteratorCursor, ScanState, TimestampFilterCursor};

use crate::index::IndexValue;
use crate::Result;

/// Direction of an index scan over `(index value, primary key)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    /// Compare two `(value, key)` pairs in scan order.
    pub fn compare(&self, a: (&IndexValue, &str), b: (&IndexValue, &str)) -> Ordering {
        let natural = a.0.cmp(b.0).then_with(|| a.1.cmp(b.1));
        match self {
            Order::Ascending => natural,
            Order::Descending => natural.reverse(),
        }
    }
}

/// Entries of one chunk's index store, all periods included.
pub trait RawIndexCursor {
    fn order(&self) -> Order;

    /// Move to the next entry; `false` once exhausted.
    fn advance(&mut self) -> Result<bool>;

    fn primary_key(&self) -> Result<&str>;

    fn index_value(&self) -> Result<&IndexValue>;

    /// Whether the current entry's period contains `timestamp`.
    fn is_visible_at(&self, timestamp: i64) -> Result<bool>;

    /// Release the cursor. Closing twice is a no-op.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

pub type CloseCallback = Box<dyn FnOnce() + Send>;

/// Resolved index view at one timestamp.
pub trait IndexScanCursor {
    fn order(&self) -> Order;

    fn advance(&mut self) -> Result<bool>;

    fn index_value(&self) -> Result<&IndexValue>;

    fn primary_key(&self) -> Result<&str>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// Run `callback` once when the cursor is closed.
    fn on_close(&mut self, callback: CloseCallback);

    /// Keep only entries matching `predicate`.
    fn filter<F>(self, predicate: F) -> FilteringCursor<Self, F>
    where
        Self: Sized,
        F: FnMut(&IndexValue, &str) -> bool,
    {
        FilteringCursor::new(self, predicate)
    }

    /// Drain the remaining entries and close the cursor.
    fn collect_entries(&mut self) -> Result<Vec<(IndexValue, String)>> {
        let drained = drain(self);
        self.close();
        drained
    }
}

fn drain<C: IndexScanCursor + ?Sized>(cursor: &mut C) -> Result<Vec<(IndexValue, String)>> {
    let mut out = Vec::new();
    while cursor.advance()? {
        out.push((cursor.index_value()?.clone(), cursor.primary_key()?.to_string()));
    }
    Ok(out)
}

impl<C: IndexScanCursor + ?Sized> IndexScanCursor for Box<C> {
    fn order(&self) -> Order {
        (**self).order()
    }

    fn advance(&mut self) -> Result<bool> {
        (**self).advance()
    }

    fn index_value(&self) -> Result<&IndexValue> {
        (**self).index_value()
    }

    fn primary_key(&self) -> Result<&str> {
        (**self).primary_key()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn on_close(&mut self, callback: CloseCallback) {
        (**self).on_close(callback)
    }
}

/// Counts raw cursors that are open against a store.
///
/// Every chunk cursor registers on open and deregisters on close, so tests
/// can check that no query leaves a cursor behind.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    open: Arc<AtomicUsize>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_cursors(&self) -> usize {
        self.open.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn register(&self) -> CursorRegistration {
        self.open.fetch_add(1, AtomicOrdering::AcqRel);
        CursorRegistration {
            open: Arc::clone(&self.open),
        }
    }
}

/// Held by an open cursor; dropping it deregisters the cursor.
#[derive(Debug)]
pub(crate) struct CursorRegistration {
    open: Arc<AtomicUsize>,
}

impl Drop for CursorRegistration {
    fn drop(&mut self) {
        self.open.fetch_sub(1, AtomicOrdering::AcqRel);
    }
}
