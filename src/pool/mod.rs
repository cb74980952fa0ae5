//! Resource pool bounding the number of open chunk environments.
//!
//! Handles are keyed by chunk directory and opened on first use. A sweep
//! closes least recently used handles until at most `keep_open` remain open,
//! skipping any handle with an active transaction. Sweeps run when an open
//! pushes the count over the limit and periodically on a background thread.

mod handle;
mod sweeper;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use handle::ManagedEnvironment;

use crate::config::PoolConfig;
use crate::kv::{ReadTxn, WriteTxn};
use crate::{Error, Result};
use handle::CloseOutcome;
use sweeper::Sweeper;

/// Counters reported by [`EnvironmentManager::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Handles known to the pool.
    pub handles: usize,
    /// Handles whose environment is currently open.
    pub open: usize,
    /// Environment opens, including reopens after eviction.
    pub opens: u64,
    /// Handles closed by sweeps.
    pub evictions: u64,
    /// Evictions skipped because a transaction was active.
    pub skipped: u64,
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub skipped: usize,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    sync_on_commit: bool,
    handles: Mutex<HashMap<PathBuf, Arc<ManagedEnvironment>>>,
    tick: AtomicU64,
    evictions: AtomicU64,
    skipped: AtomicU64,
    shut_down: AtomicBool,
}

impl PoolInner {
    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::Closed("environment manager"));
        }
        Ok(())
    }

    fn snapshot_handles(&self) -> Vec<Arc<ManagedEnvironment>> {
        match self.handles.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }

    fn open_count(&self) -> usize {
        self.snapshot_handles().iter().filter(|h| h.is_open()).count()
    }

    pub(crate) fn sweep(&self) -> SweepReport {
        let mut open: Vec<Arc<ManagedEnvironment>> = self
            .snapshot_handles()
            .into_iter()
            .filter(|h| h.is_open())
            .collect();
        let mut report = SweepReport::default();
        if open.len() <= self.config.keep_open {
            return report;
        }
        let mut excess = open.len() - self.config.keep_open;
        open.sort_by_key(|h| h.last_access());
        for handle in &open {
            if excess == 0 {
                break;
            }
            match handle.close(false) {
                CloseOutcome::Closed => {
                    excess -= 1;
                    report.evicted += 1;
                    self.evictions.fetch_add(1, Ordering::AcqRel);
                }
                CloseOutcome::Busy => {
                    log::debug!(
                        "skipping eviction of {}: {} active transactions",
                        handle.path().display(),
                        handle.active_transactions()
                    );
                    report.skipped += 1;
                    self.skipped.fetch_add(1, Ordering::AcqRel);
                }
                CloseOutcome::AlreadyClosed => excess -= 1,
            }
        }
        report
    }
}

/// Pool of lazily opened chunk environments.
pub struct EnvironmentManager {
    inner: Arc<PoolInner>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl EnvironmentManager {
    pub fn new(config: PoolConfig, sync_on_commit: bool) -> Result<Self> {
        if config.keep_open == 0 {
            return Err(Error::precondition("pool keep_open must be at least 1"));
        }
        let interval = config.sweep_interval();
        let inner = Arc::new(PoolInner {
            config,
            sync_on_commit,
            handles: Mutex::new(HashMap::new()),
            tick: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        });
        let sweeper = match interval {
            Some(interval) => Some(Sweeper::spawn(Arc::downgrade(&inner), interval)?),
            None => None,
        };
        Ok(Self {
            inner,
            sweeper: Mutex::new(sweeper),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Handle for `path`, registered on first use. Does not open it.
    pub fn handle(&self, path: &Path) -> Result<Arc<ManagedEnvironment>> {
        self.inner.ensure_running()?;
        let mut map = self
            .inner
            .handles
            .lock()
            .map_err(|_| Error::Closed("environment manager lock poisoned"))?;
        let handle = map
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(ManagedEnvironment::new(path.to_path_buf(), self.inner.sync_on_commit)));
        Ok(Arc::clone(handle))
    }

    fn touch(&self, handle: &ManagedEnvironment) {
        let tick = self.inner.tick.fetch_add(1, Ordering::AcqRel) + 1;
        handle.touch(tick);
    }

    fn after_access(&self, was_open: bool) {
        if !was_open && self.inner.open_count() > self.inner.config.keep_open {
            self.inner.sweep();
        }
    }

    /// Read transaction on the environment at `path`.
    pub fn read(&self, path: &Path) -> Result<ReadTxn> {
        let handle = self.handle(path)?;
        self.touch(&handle);
        let was_open = handle.is_open();
        let txn = handle.begin_read()?;
        self.after_access(was_open);
        Ok(txn)
    }

    /// Write transaction on the environment at `path`.
    pub fn write(&self, path: &Path) -> Result<WriteTxn> {
        let handle = self.handle(path)?;
        self.touch(&handle);
        let was_open = handle.is_open();
        let txn = handle.begin_write()?;
        self.after_access(was_open);
        Ok(txn)
    }

    /// Log size and put count of the environment at `path`.
    pub fn usage(&self, path: &Path) -> Result<(u64, u64)> {
        let handle = self.handle(path)?;
        self.touch(&handle);
        let was_open = handle.is_open();
        let usage = handle.usage()?;
        self.after_access(was_open);
        Ok(usage)
    }

    /// Force-close and forget the handle for `path`, if any.
    pub fn discard(&self, path: &Path) -> Result<()> {
        self.inner.ensure_running()?;
        let removed = self
            .inner
            .handles
            .lock()
            .map_err(|_| Error::Closed("environment manager lock poisoned"))?
            .remove(path);
        if let Some(handle) = removed {
            if handle.close(true) == CloseOutcome::Closed {
                log::debug!("discarded environment {}", path.display());
            }
        }
        Ok(())
    }

    /// Close least recently used handles beyond `keep_open`.
    pub fn sweep(&self) -> Result<SweepReport> {
        self.inner.ensure_running()?;
        Ok(self.inner.sweep())
    }

    pub fn stats(&self) -> PoolStats {
        let handles = self.inner.snapshot_handles();
        PoolStats {
            handles: handles.len(),
            open: handles.iter().filter(|h| h.is_open()).count(),
            opens: handles.iter().map(|h| h.opens()).sum(),
            evictions: self.inner.evictions.load(Ordering::Acquire),
            skipped: self.inner.skipped.load(Ordering::Acquire),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stop the sweeper and close every handle, active transactions or not.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let sweeper = match self.sweeper.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }
        let mut closed = 0;
        for handle in self.inner.snapshot_handles() {
            if handle.close(true) == CloseOutcome::Closed {
                closed += 1;
            }
        }
        log::info!("environment manager shut down, closed {closed} environments");
    }
}

impl Drop for EnvironmentManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(keep_open: usize) -> EnvironmentManager {
        EnvironmentManager::new(
            PoolConfig {
                keep_open,
                sweep_interval_ms: 0,
            },
            false,
        )
        .expect("manager")
    }

    #[test]
    fn test_third_open_evicts_least_recently_used() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let pool = manager(2);
        let (a, b, c) = (dir.path().join("a"), dir.path().join("b"), dir.path().join("c"));
        pool.read(&a)?.commit();
        pool.read(&b)?.commit();
        pool.read(&c)?.commit();

        assert!(!pool.handle(&a)?.is_open());
        assert!(pool.handle(&b)?.is_open());
        assert!(pool.handle(&c)?.is_open());
        assert_eq!(pool.stats().evictions, 1);
        Ok(())
    }

    #[test]
    fn test_active_transaction_is_never_evicted() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let pool = manager(2);
        let (a, b, c) = (dir.path().join("a"), dir.path().join("b"), dir.path().join("c"));
        let pinned = pool.read(&a)?;
        pool.read(&b)?.commit();
        pool.read(&c)?.commit();

        assert!(pool.handle(&a)?.is_open());
        assert!(!pool.handle(&b)?.is_open());
        assert!(pool.handle(&c)?.is_open());
        let stats = pool.stats();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.evictions, 1);

        pinned.commit();
        assert_eq!(pool.sweep()?, SweepReport::default());
        Ok(())
    }

    #[test]
    fn test_evicted_handle_reopens_with_data() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let pool = manager(1);
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        let mut txn = pool.write(&a)?;
        txn.put("s", b"k".to_vec(), b"v".to_vec());
        txn.commit()?;
        pool.read(&b)?.commit();
        assert!(!pool.handle(&a)?.is_open());

        let txn = pool.read(&a)?;
        assert_eq!(txn.get("s", b"k"), Some(&b"v"[..]));
        assert_eq!(pool.stats().opens, 3);
        Ok(())
    }

    #[test]
    fn test_shutdown_closes_everything_and_rejects_use() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let pool = manager(4);
        let a = dir.path().join("a");
        let _active = pool.read(&a)?;
        pool.shutdown();
        assert!(!pool.handle_unchecked(&a).is_open());
        assert!(pool.read(&a).unwrap_err().is_closed());
        assert!(pool.sweep().unwrap_err().is_closed());
        pool.shutdown();
        Ok(())
    }

    #[test]
    fn test_background_sweeper_evicts() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let pool = EnvironmentManager::new(
            PoolConfig {
                keep_open: 1,
                sweep_interval_ms: 10,
            },
            false,
        )?;
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        let first = pool.read(&a)?;
        pool.read(&b)?.commit();
        first.commit();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while pool.stats().open > 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(pool.stats().open, 1);
        Ok(())
    }

    impl EnvironmentManager {
        fn handle_unchecked(&self, path: &Path) -> Arc<ManagedEnvironment> {
            let map = self.inner.handles.lock().unwrap();
            Arc::clone(map.get(path).unwrap())
        }
    }
}
