use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::kv::{Environment, ReadTxn, TxnPin, WriteTxn};
use crate::{Error, Result};

/// Outcome of trying to close a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseOutcome {
    Closed,
    AlreadyClosed,
    Busy,
}

/// One pooled environment, opened lazily and reopened on demand.
///
/// Transactions take the read lock to obtain the environment and pin it with
/// the active-transaction counter before releasing the lock. Closing takes the
/// write lock and gives up while any transaction is pinned.
pub struct ManagedEnvironment {
    path: PathBuf,
    sync_on_commit: bool,
    env: RwLock<Option<Arc<Environment>>>,
    active: Arc<AtomicUsize>,
    last_access: AtomicU64,
    opens: AtomicU64,
}

impl ManagedEnvironment {
    pub(crate) fn new(path: PathBuf, sync_on_commit: bool) -> Self {
        Self {
            path,
            sync_on_commit,
            env: RwLock::new(None),
            active: Arc::new(AtomicUsize::new(0)),
            last_access: AtomicU64::new(0),
            opens: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.env.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Transactions currently pinning this handle.
    pub fn active_transactions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::AcqRel);
    }

    /// Times the underlying environment was opened.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Acquire)
    }

    fn pinned(&self) -> Result<(Arc<Environment>, TxnPin)> {
        {
            let slot = self
                .env
                .read()
                .map_err(|_| Error::Closed("environment lock poisoned"))?;
            if let Some(env) = slot.as_ref() {
                return Ok((Arc::clone(env), TxnPin::acquire(&self.active)));
            }
        }
        let mut slot = self
            .env
            .write()
            .map_err(|_| Error::Closed("environment lock poisoned"))?;
        let env = match slot.as_ref() {
            Some(env) => Arc::clone(env),
            None => {
                let env = Arc::new(Environment::open(&self.path, self.sync_on_commit)?);
                self.opens.fetch_add(1, Ordering::AcqRel);
                *slot = Some(Arc::clone(&env));
                env
            }
        };
        Ok((env, TxnPin::acquire(&self.active)))
    }

    pub(crate) fn begin_read(&self) -> Result<ReadTxn> {
        let (env, pin) = self.pinned()?;
        env.begin_read_pinned(pin)
    }

    pub(crate) fn begin_write(&self) -> Result<WriteTxn> {
        let (env, pin) = self.pinned()?;
        env.begin_write_pinned(pin)
    }

    /// Size and entry count of the environment, opening it if needed.
    pub(crate) fn usage(&self) -> Result<(u64, u64)> {
        let (env, _pin) = self.pinned()?;
        Ok((env.size_bytes(), env.entry_count()))
    }

    /// Close unless a transaction is active, or regardless when `force`d.
    pub(crate) fn close(&self, force: bool) -> CloseOutcome {
        let mut slot = match self.env.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            return CloseOutcome::AlreadyClosed;
        }
        let active = self.active.load(Ordering::Acquire);
        if active > 0 && !force {
            return CloseOutcome::Busy;
        }
        if let Some(env) = slot.take() {
            if let Err(err) = env.sync() {
                log::warn!("sync of {} on close failed: {err}", self.path.display());
            }
        }
        log::debug!(
            "closed environment {} ({} active transactions)",
            self.path.display(),
            active
        );
        CloseOutcome::Closed
    }
}

impl std::fmt::Debug for ManagedEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedEnvironment")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("active", &self.active_transactions())
            .finish()
    }
}
