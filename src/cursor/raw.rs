use crate::cursor::{CursorRegistration, CursorTracker, Order, RawIndexCursor};
use crate::index::{decode_entry, IndexDefinition, IndexEntry, IndexRange, IndexValue};
use crate::kv::{KvCursor, ReadTxn};
use crate::{Error, Result};

/// Raw cursor over one chunk's index store.
///
/// Holds its read transaction, and with it the pooled environment, until
/// closed. Entries come in `(value, primary key, lower bound)` order, reversed
/// for [`Order::Descending`].
pub struct ChunkIndexCursor {
    definition: IndexDefinition,
    order: Order,
    kv: Option<KvCursor>,
    txn: Option<ReadTxn>,
    current: Option<IndexEntry>,
    registration: Option<CursorRegistration>,
}

impl ChunkIndexCursor {
    pub fn open(
        txn: ReadTxn,
        definition: &IndexDefinition,
        range: &IndexRange,
        order: Order,
        tracker: &CursorTracker,
    ) -> Self {
        let (lower, upper) = range.byte_bounds();
        let kv = txn.cursor(&definition.store_name(), lower, upper);
        log::trace!("opened index cursor on {} ({order:?})", definition.name);
        Self {
            definition: definition.clone(),
            order,
            kv: Some(kv),
            txn: Some(txn),
            current: None,
            registration: Some(tracker.register()),
        }
    }

    /// Full entry under the cursor, period included.
    pub fn entry(&self) -> Result<&IndexEntry> {
        if self.kv.is_none() {
            return Err(Error::Closed("raw index cursor"));
        }
        self.current
            .as_ref()
            .ok_or_else(|| Error::precondition("cursor is not positioned"))
    }
}

impl RawIndexCursor for ChunkIndexCursor {
    fn order(&self) -> Order {
        self.order
    }

    fn advance(&mut self) -> Result<bool> {
        let kv = self.kv.as_mut().ok_or(Error::Closed("raw index cursor"))?;
        let moved = match self.order {
            Order::Ascending => kv.next(),
            Order::Descending => kv.prev(),
        };
        if !moved {
            self.current = None;
            return Ok(false);
        }
        match (kv.key(), kv.value()) {
            (Some(key), Some(value)) => {
                self.current = Some(decode_entry(self.definition.kind, key, value)?);
                Ok(true)
            }
            _ => {
                self.current = None;
                Ok(false)
            }
        }
    }

    fn primary_key(&self) -> Result<&str> {
        Ok(&self.entry()?.primary_key)
    }

    fn index_value(&self) -> Result<&IndexValue> {
        Ok(&self.entry()?.value)
    }

    fn is_visible_at(&self, timestamp: i64) -> Result<bool> {
        Ok(self.entry()?.period.contains(timestamp))
    }

    fn close(&mut self) {
        if self.kv.take().is_some() {
            self.current = None;
            if let Some(txn) = self.txn.take() {
                txn.commit();
            }
            self.registration = None;
        }
    }

    fn is_closed(&self) -> bool {
        self.kv.is_none()
    }
}

impl Drop for ChunkIndexCursor {
    fn drop(&mut self) {
        if !self.is_closed() {
            log::warn!(
                "index cursor on {} dropped without close; closing it now",
                self.definition.name
            );
            self.close();
        }
    }
}
