//! Read and write transactions over one environment.

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::kv::cursor::KvCursor;
use crate::kv::env::{Environment, Put, Snapshot};
use crate::Result;

/// Marks a transaction as active against a pooled handle until dropped.
#[derive(Debug)]
pub struct TxnPin {
    active: Arc<AtomicUsize>,
}

impl TxnPin {
    pub(crate) fn acquire(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for TxnPin {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Snapshot-isolated read transaction.
#[derive(Debug)]
pub struct ReadTxn {
    snapshot: Snapshot,
    _pin: Option<TxnPin>,
}

impl ReadTxn {
    pub(crate) fn new(snapshot: Snapshot, pin: Option<TxnPin>) -> Self {
        Self {
            snapshot,
            _pin: pin,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn get(&self, store: &str, key: &[u8]) -> Option<&[u8]> {
        self.snapshot.get(store, key)
    }

    pub fn floor_entry(&self, store: &str, key: &[u8]) -> Option<(&[u8], &[u8])> {
        self.snapshot.floor_entry(store, key)
    }

    pub fn higher_entry(&self, store: &str, key: &[u8]) -> Option<(&[u8], &[u8])> {
        self.snapshot.higher_entry(store, key)
    }

    /// Positioned cursor over `store` restricted to the byte bounds.
    pub fn cursor(&self, store: &str, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> KvCursor {
        KvCursor::new(&self.snapshot, store, lower, upper)
    }

    /// Read transactions have nothing to persist; ending one releases the handle.
    pub fn commit(self) {}

    pub fn abort(self) {}
}

/// Buffered write transaction; nothing is visible to others before `commit`.
pub struct WriteTxn {
    env: Arc<Environment>,
    base: Snapshot,
    puts: Vec<Put>,
    _pin: Option<TxnPin>,
}

impl WriteTxn {
    pub(crate) fn new(env: Arc<Environment>, base: Snapshot, pin: Option<TxnPin>) -> Self {
        Self {
            env,
            base,
            puts: Vec::new(),
            _pin: pin,
        }
    }

    /// Committed state this transaction started from.
    pub fn snapshot(&self) -> &Snapshot {
        &self.base
    }

    pub fn put(&mut self, store: &str, key: Vec<u8>, value: Vec<u8>) {
        self.puts.push(Put {
            store: store.to_string(),
            key,
            value,
        });
    }

    pub fn commit(self) -> Result<()> {
        let Self { env, base, puts, _pin } = self;
        // the base snapshot would force the commit to copy every table it touches
        drop(base);
        env.apply(&puts)
    }

    pub fn abort(self) {
        if !self.puts.is_empty() {
            log::debug!("aborting write transaction with {} pending puts", self.puts.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_txn_is_invisible_until_commit() -> Result<()> {
        let env = Arc::new(Environment::in_memory());
        let mut txn = env.begin_write()?;
        txn.put("s", b"a".to_vec(), b"1".to_vec());
        assert_eq!(txn.snapshot().get("s", b"a"), None);
        assert_eq!(env.snapshot()?.get("s", b"a"), None);
        txn.commit()?;
        assert_eq!(env.snapshot()?.get("s", b"a"), Some(&b"1"[..]));
        Ok(())
    }

    #[test]
    fn test_abort_discards() -> Result<()> {
        let env = Arc::new(Environment::in_memory());
        let mut txn = env.begin_write()?;
        txn.put("s", b"a".to_vec(), b"1".to_vec());
        txn.abort();
        assert_eq!(env.snapshot()?.get("s", b"a"), None);
        Ok(())
    }

    #[test]
    fn test_pin_tracks_active_transactions() -> Result<()> {
        let env = Environment::in_memory();
        let active = Arc::new(AtomicUsize::new(0));
        let txn = env.begin_read_pinned(TxnPin::acquire(&active))?;
        assert_eq!(active.load(Ordering::Acquire), 1);
        txn.commit();
        assert_eq!(active.load(Ordering::Acquire), 0);
        Ok(())
    }
}
