use crate::cursor::{CloseCallback, IndexScanCursor, Order, RawIndexCursor};
use crate::index::IndexValue;
use crate::{Error, Result};

/// Lifecycle bookkeeping shared by scan cursors: one-time initialization and
/// idempotent close with callbacks.
pub struct ScanState {
    name: &'static str,
    initialized: bool,
    closed: bool,
    callbacks: Vec<CloseCallback>,
}

impl ScanState {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            initialized: false,
            closed: false,
            callbacks: Vec::new(),
        }
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed(self.name));
        }
        Ok(())
    }

    /// Returns `true` exactly once, on the first advance.
    pub fn begin(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let first = !self.initialized;
        self.initialized = true;
        Ok(first)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark closed and run the callbacks. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for callback in self.callbacks.drain(..) {
            callback();
        }
        true
    }

    pub fn on_close(&mut self, callback: CloseCallback) {
        if self.closed {
            callback();
        } else {
            self.callbacks.push(callback);
        }
    }

    pub(crate) fn warn_if_leaked(&self) {
        if !self.closed {
            log::warn!("{} dropped without close; closing it now", self.name);
        }
    }
}

fn not_positioned() -> Error {
    Error::precondition("cursor is not positioned")
}

/// Raw cursor restricted to entries visible at one timestamp.
pub struct TimestampFilterCursor {
    inner: Box<dyn RawIndexCursor>,
    timestamp: i64,
    positioned: bool,
    state: ScanState,
}

impl TimestampFilterCursor {
    pub fn new(inner: Box<dyn RawIndexCursor>, timestamp: i64) -> Self {
        Self {
            inner,
            timestamp,
            positioned: false,
            state: ScanState::new("timestamp filter cursor"),
        }
    }

    fn check_current(&self) -> Result<()> {
        self.state.ensure_open()?;
        if !self.positioned {
            return Err(not_positioned());
        }
        Ok(())
    }
}

impl IndexScanCursor for TimestampFilterCursor {
    fn order(&self) -> Order {
        self.inner.order()
    }

    fn advance(&mut self) -> Result<bool> {
        self.state.begin()?;
        self.positioned = false;
        while self.inner.advance()? {
            if self.inner.is_visible_at(self.timestamp)? {
                self.positioned = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn index_value(&self) -> Result<&IndexValue> {
        self.check_current()?;
        self.inner.index_value()
    }

    fn primary_key(&self) -> Result<&str> {
        self.check_current()?;
        self.inner.primary_key()
    }

    fn close(&mut self) {
        if self.state.close() {
            self.inner.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn on_close(&mut self, callback: CloseCallback) {
        self.state.on_close(callback);
    }
}

impl Drop for TimestampFilterCursor {
    fn drop(&mut self) {
        self.state.warn_if_leaked();
        self.close();
    }
}

/// Scan cursor over an in-memory sequence of entries.
pub struct IteratorCursor {
    pending: Vec<(IndexValue, String)>,
    needs_sort: bool,
    entries: std::vec::IntoIter<(IndexValue, String)>,
    current: Option<(IndexValue, String)>,
    order: Order,
    state: ScanState,
}

impl IteratorCursor {
    /// `entries` must be sorted and free of duplicates in `order`.
    pub fn new(order: Order, entries: Vec<(IndexValue, String)>) -> Result<Self> {
        let sorted = entries.windows(2).all(|pair| {
            order.compare((&pair[0].0, &pair[0].1), (&pair[1].0, &pair[1].1))
                == std::cmp::Ordering::Less
        });
        if !sorted {
            return Err(Error::precondition(format!(
                "iterator cursor entries are not strictly {order:?}"
            )));
        }
        Ok(Self::with_entries(order, entries, false))
    }

    /// Sorts and deduplicates `entries` on the first advance.
    pub fn from_unsorted(order: Order, entries: Vec<(IndexValue, String)>) -> Self {
        Self::with_entries(order, entries, true)
    }

    fn with_entries(order: Order, entries: Vec<(IndexValue, String)>, needs_sort: bool) -> Self {
        Self {
            pending: entries,
            needs_sort,
            entries: Vec::new().into_iter(),
            current: None,
            order,
            state: ScanState::new("iterator cursor"),
        }
    }

    fn start(&mut self) {
        let mut entries = std::mem::take(&mut self.pending);
        if self.needs_sort {
            let order = self.order;
            entries.sort_by(|a, b| order.compare((&a.0, &a.1), (&b.0, &b.1)));
            entries.dedup();
        }
        self.entries = entries.into_iter();
    }

    fn current(&self) -> Result<&(IndexValue, String)> {
        self.state.ensure_open()?;
        self.current.as_ref().ok_or_else(not_positioned)
    }
}

impl IndexScanCursor for IteratorCursor {
    fn order(&self) -> Order {
        self.order
    }

    fn advance(&mut self) -> Result<bool> {
        if self.state.begin()? {
            self.start();
        }
        self.current = self.entries.next();
        Ok(self.current.is_some())
    }

    fn index_value(&self) -> Result<&IndexValue> {
        Ok(&self.current()?.0)
    }

    fn primary_key(&self) -> Result<&str> {
        Ok(&self.current()?.1)
    }

    fn close(&mut self) {
        if self.state.close() {
            self.current = None;
        }
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn on_close(&mut self, callback: CloseCallback) {
        self.state.on_close(callback);
    }
}

/// Scan cursor keeping only entries matching a predicate.
pub struct FilteringCursor<C, F>
where
    C: IndexScanCursor,
    F: FnMut(&IndexValue, &str) -> bool,
{
    inner: C,
    predicate: F,
    positioned: bool,
    state: ScanState,
}

impl<C, F> FilteringCursor<C, F>
where
    C: IndexScanCursor,
    F: FnMut(&IndexValue, &str) -> bool,
{
    pub fn new(inner: C, predicate: F) -> Self {
        Self {
            inner,
            predicate,
            positioned: false,
            state: ScanState::new("filtering cursor"),
        }
    }

    fn check_current(&self) -> Result<()> {
        self.state.ensure_open()?;
        if !self.positioned {
            return Err(not_positioned());
        }
        Ok(())
    }
}

impl<C, F> IndexScanCursor for FilteringCursor<C, F>
where
    C: IndexScanCursor,
    F: FnMut(&IndexValue, &str) -> bool,
{
    fn order(&self) -> Order {
        self.inner.order()
    }

    fn advance(&mut self) -> Result<bool> {
        self.state.begin()?;
        self.positioned = false;
        while self.inner.advance()? {
            if (self.predicate)(self.inner.index_value()?, self.inner.primary_key()?) {
                self.positioned = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn index_value(&self) -> Result<&IndexValue> {
        self.check_current()?;
        self.inner.index_value()
    }

    fn primary_key(&self) -> Result<&str> {
        self.check_current()?;
        self.inner.primary_key()
    }

    fn close(&mut self) {
        if self.state.close() {
            self.inner.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn on_close(&mut self, callback: CloseCallback) {
        self.state.on_close(callback);
    }
}

impl<C, F> Drop for FilteringCursor<C, F>
where
    C: IndexScanCursor,
    F: FnMut(&IndexValue, &str) -> bool,
{
    fn drop(&mut self) {
        self.state.warn_if_leaked();
        self.close();
    }
}
