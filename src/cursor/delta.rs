//! Merge of a parent's resolved index view with a branch's own entries.

use std::cmp::Ordering;

use crate::cursor::{CloseCallback, IndexScanCursor, Order, RawIndexCursor, ScanState};
use crate::index::IndexValue;
use crate::{Error, Result};

/// Effective index view of a branch at `timestamp`.
///
/// The parent view is already resolved; the branch cursor holds the raw
/// entries written on this branch. A branch entry with the same
/// `(value, primary key)` as the parent's current entry replaces it: it is
/// emitted once if visible, and hides the parent entry if not.
pub struct DeltaCursor {
    parent: Box<dyn IndexScanCursor>,
    cursor: Box<dyn RawIndexCursor>,
    timestamp: i64,
    order: Order,
    parent_live: bool,
    parent_pending: bool,
    branch_live: bool,
    branch_pending: bool,
    current: Option<(IndexValue, String)>,
    state: ScanState,
}

impl DeltaCursor {
    pub fn new(
        parent: Box<dyn IndexScanCursor>,
        cursor: Box<dyn RawIndexCursor>,
        timestamp: i64,
    ) -> Result<Self> {
        if parent.order() != cursor.order() {
            let (parent_order, cursor_order) = (parent.order(), cursor.order());
            let mut parent = parent;
            let mut cursor = cursor;
            parent.close();
            cursor.close();
            return Err(Error::precondition(format!(
                "parent order {parent_order:?} does not match branch order {cursor_order:?}"
            )));
        }
        let order = cursor.order();
        Ok(Self {
            parent,
            cursor,
            timestamp,
            order,
            parent_live: false,
            parent_pending: false,
            branch_live: false,
            branch_pending: false,
            current: None,
            state: ScanState::new("delta cursor"),
        })
    }

    fn parent_entry(&self) -> Result<(IndexValue, String)> {
        Ok((self.parent.index_value()?.clone(), self.parent.primary_key()?.to_string()))
    }

    fn branch_entry(&self) -> Result<(IndexValue, String)> {
        Ok((self.cursor.index_value()?.clone(), self.cursor.primary_key()?.to_string()))
    }

    fn emit(&mut self, entry: (IndexValue, String)) -> Result<bool> {
        self.current = Some(entry);
        Ok(true)
    }

    fn current(&self) -> Result<&(IndexValue, String)> {
        self.state.ensure_open()?;
        self.current
            .as_ref()
            .ok_or_else(|| Error::precondition("cursor is not positioned"))
    }
}

impl IndexScanCursor for DeltaCursor {
    fn order(&self) -> Order {
        self.order
    }

    fn advance(&mut self) -> Result<bool> {
        if self.state.begin()? {
            // neither input is touched before the first advance
            self.parent_pending = true;
            self.branch_pending = true;
        }
        self.current = None;
        loop {
            if self.parent_pending {
                self.parent_live = self.parent.advance()?;
                self.parent_pending = false;
            }
            if self.branch_pending {
                self.branch_live = self.cursor.advance()?;
                self.branch_pending = false;
            }

            match (self.parent_live, self.branch_live) {
                (false, false) => return Ok(false),
                (true, false) => {
                    let entry = self.parent_entry()?;
                    self.parent_pending = true;
                    return self.emit(entry);
                }
                (false, true) => {
                    self.branch_pending = true;
                    if self.cursor.is_visible_at(self.timestamp)? {
                        let entry = self.branch_entry()?;
                        return self.emit(entry);
                    }
                }
                (true, true) => {
                    let ordering = self.order.compare(
                        (self.parent.index_value()?, self.parent.primary_key()?),
                        (self.cursor.index_value()?, self.cursor.primary_key()?),
                    );
                    match ordering {
                        Ordering::Less => {
                            let entry = self.parent_entry()?;
                            self.parent_pending = true;
                            return self.emit(entry);
                        }
                        Ordering::Greater => {
                            self.branch_pending = true;
                            if self.cursor.is_visible_at(self.timestamp)? {
                                let entry = self.branch_entry()?;
                                return self.emit(entry);
                            }
                        }
                        Ordering::Equal => {
                            self.parent_pending = true;
                            self.branch_pending = true;
                            if self.cursor.is_visible_at(self.timestamp)? {
                                let entry = self.branch_entry()?;
                                return self.emit(entry);
                            }
                        }
                    }
                }
            }
        }
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
            self.parent.close();
            self.cursor.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn on_close(&mut self, callback: CloseCallback) {
        self.state.on_close(callback);
    }
}

impl Drop for DeltaCursor {
    fn drop(&mut self) {
        self.state.warn_if_leaked();
        self.close();
    }
}
