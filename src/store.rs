//! Temporal store facade.
//!
//! Ties the branch tree, chunk sequences, environment pool and timestamp
//! provider together into the public read and write API.
//!
//! ```no_run
//! use chronicle_temporal::{Order, TemporalStore, WriteBatch, MASTER};
//!
//! let store = TemporalStore::open("./data")?;
//! let mut batch = WriteBatch::new();
//! batch.put("users", "alice", "admin");
//! let t1 = store.commit(MASTER, &batch)?;
//!
//! store.create_branch("staging", MASTER, None)?;
//! let result = store.get("staging", "users", "alice", t1)?;
//! assert_eq!(result.value.as_deref(), Some(&b"admin"[..]));
//!
//! let history = store.history(MASTER, "users", "alice", &result.period, Order::Ascending)?;
//! # Ok::<(), chronicle_temporal::Error>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::batch::{IndexChange, WriteBatch};
use crate::branch::{Branch, BranchInfo, BranchManager, Level};
use crate::chunk::{chunk_path, should_rollover, ChunkInfo, ChunkStats, CHUNK_META_FILE};
use crate::clock::{Clock, SystemClock};
use crate::config::{RolloverPolicy, StoreConfig};
use crate::cursor::{
    ChunkIndexCursor, CursorTracker, DeltaCursor, IndexScanCursor, Order, TimestampFilterCursor,
};
use crate::index::{
    decode_entry, encode_entry_key, encode_upper, entry_prefix, prefix_successor, IndexDefinition,
    IndexKind, IndexRange, IndexValue,
};
use crate::key::{
    self, decode_ascending, decode_commit, decode_timeline, encode_ascending, encode_commit,
    encode_timeline, keyspace_of_matrix, matrix_name, timeline_name, TemporalKey, COMMIT_LOG,
};
use crate::kv::WriteTxn;
use crate::meta::{read_json, write_json};
use crate::period::{Period, OPEN_END};
use crate::pool::{EnvironmentManager, PoolStats, SweepReport};
use crate::resolver::{self, ChunkLookup, GetResult};
use crate::timestamp::CommitTimestampProvider;
use crate::{Error, Result};

pub const STORE_META_FILE: &str = "store.json";

/// Persisted store-wide settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreMeta {
    #[serde(default)]
    config: StoreConfig,
    #[serde(default)]
    indexes: Vec<IndexDefinition>,
}

/// One chunk consulted by a resolution, with the timestamp to read it at.
#[derive(Debug, Clone)]
struct ChainLink {
    path: PathBuf,
    timestamp: i64,
}

/// Chunks a read at `timestamp` resolves against, query branch first.
///
/// Levels the timestamp precedes are skipped. The walk stops at the root or
/// at a self-contained chunk; a branch's first chunk defers to its parent at
/// the fork.
fn resolution_chain(levels: &[Level], timestamp: i64) -> Result<Vec<ChainLink>> {
    let mut chain = Vec::new();
    let mut at = timestamp;
    for level in levels {
        if let Some(fork) = level.fork {
            if at < fork {
                continue;
            }
        }
        let chunk = level.chunks.chunk_for(at).ok_or_else(|| {
            Error::CorruptState(format!("branch {} has no chunk covering {at}", level.branch))
        })?;
        chain.push(ChainLink {
            path: level.chunks.path_of(chunk),
            timestamp: at,
        });
        match level.fork {
            Some(fork) if chunk.is_first() => at = fork,
            _ => return Ok(chain),
        }
    }
    Err(Error::CorruptState("branch ancestry does not end at a root".to_string()))
}

/// Per-level periods of a lineage query: the query branch covers `period`,
/// every ancestor only what its child still sees (up to and including the
/// child's fork).
fn lineage_periods<'a>(levels: &'a [Level], period: &Period) -> Vec<(&'a Level, Period)> {
    let mut out = Vec::new();
    let mut upper = period.upper();
    for (depth, level) in levels.iter().enumerate() {
        if depth > 0 {
            if let Some(child_fork) = levels[depth - 1].fork {
                upper = upper.min(child_fork.saturating_add(1));
            }
        }
        match Period::new(period.lower(), upper) {
            Ok(range) => out.push((level, range)),
            Err(_) => break,
        }
    }
    out
}

fn apply_caps(upper: i64, caps: &[(i64, i64)]) -> i64 {
    caps.iter().rev().fold(upper, |hi, &(fork, local_upper)| {
        if hi > fork {
            local_upper
        } else {
            hi
        }
    })
}

fn payload(value: &[u8]) -> Option<Vec<u8>> {
    (!value.is_empty()).then(|| value.to_vec())
}

/// A temporal, branchable key-value store rooted at one directory.
pub struct TemporalStore {
    root: PathBuf,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    timestamps: Arc<CommitTimestampProvider>,
    branches: BranchManager,
    pool: EnvironmentManager,
    indexes: RwLock<BTreeMap<String, IndexDefinition>>,
    index_lock: RwLock<()>,
    cursors: CursorTracker,
    closed: AtomicBool,
}

impl TemporalStore {
    /// Open or create a store, reusing the persisted configuration if any.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let meta_path = root.join(STORE_META_FILE);
        let config = if meta_path.exists() {
            read_json::<StoreMeta>(&meta_path)?.config
        } else {
            StoreConfig::default()
        };
        Self::open_with(root, config)
    }

    /// Open or create a store with `config`, replacing the persisted one.
    pub fn open_with(root: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        Self::open_with_clock(root, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(root: impl AsRef<Path>, config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let meta_path = root.join(STORE_META_FILE);
        let indexes = if meta_path.exists() {
            read_json::<StoreMeta>(&meta_path)?.indexes
        } else {
            Vec::new()
        };

        let timestamps = Arc::new(CommitTimestampProvider::with_wait_increment(
            Arc::clone(&clock),
            config.timestamp_wait(),
        ));
        let branches = BranchManager::open(&root, clock.now_millis())?;
        let pool = EnvironmentManager::new(config.pool.clone(), config.sync_on_commit)?;
        let store = Self {
            root,
            config,
            clock,
            timestamps,
            branches,
            pool,
            indexes: RwLock::new(
                indexes
                    .into_iter()
                    .map(|definition| (definition.name.clone(), definition))
                    .collect(),
            ),
            index_lock: RwLock::new(()),
            cursors: CursorTracker::new(),
            closed: AtomicBool::new(false),
        };
        store.persist_meta()?;
        log::info!(
            "opened temporal store {} ({} branches)",
            store.root.display(),
            store.branches.names()?.len()
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("temporal store"));
        }
        Ok(())
    }

    fn persist_meta(&self) -> Result<()> {
        let meta = StoreMeta {
            config: self.config.clone(),
            indexes: self.read_indexes()?.values().cloned().collect(),
        };
        write_json(&self.root.join(STORE_META_FILE), &meta)
    }

    fn read_indexes(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, IndexDefinition>>> {
        self.indexes
            .read()
            .map_err(|_| Error::Closed("index registry lock poisoned"))
    }

    fn index_definition(&self, name: &str) -> Result<IndexDefinition> {
        self.read_indexes()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    // ---- reads ----

    fn chunk_lookup(&self, path: &Path, keyspace: &str, key: &str, timestamp: i64) -> Result<ChunkLookup> {
        let txn = self.pool.read(path)?;
        let found = resolver::lookup(txn.snapshot(), keyspace, key, timestamp);
        txn.commit();
        found
    }

    /// First version of `key` on `level` after `timestamp`, looking at
    /// `chunk` and every later chunk.
    fn version_after(
        &self,
        level: &Level,
        chunk: &ChunkInfo,
        keyspace: &str,
        key: &str,
        timestamp: i64,
    ) -> Result<Option<i64>> {
        for later in level.chunks.chunks().iter().filter(|c| c.index >= chunk.index) {
            let found = self.chunk_lookup(&level.chunks.path_of(later), keyspace, key, timestamp)?;
            if found.ceiling.is_some() {
                return Ok(found.ceiling);
            }
        }
        Ok(None)
    }

    /// Latest version of `key` on `level` at or before `timestamp` in the
    /// chunks preceding `chunk`, newest chunk first.
    fn version_before(
        &self,
        level: &Level,
        chunk: &ChunkInfo,
        keyspace: &str,
        key: &str,
        timestamp: i64,
    ) -> Result<Option<ChunkLookup>> {
        for earlier in level.chunks.chunks().iter().rev().filter(|c| c.index < chunk.index) {
            let found = self.chunk_lookup(&level.chunks.path_of(earlier), keyspace, key, timestamp)?;
            if found.has_floor {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Point read across the ancestor list.
    ///
    /// `caps` collects, per branch passed on the way to the resolving level,
    /// the fork and the first local version after it. A period reaching past
    /// a fork ends where that branch diverges.
    ///
    /// A version holds until the next version on its level, which after a
    /// rollover is the carry-forward copy. A miss looks through the level's
    /// earlier chunks and then the parent, so absence is bounded only by
    /// real versions and a key never written anywhere is absent forever.
    fn get_in(&self, levels: &[Level], keyspace: &str, key: &str, timestamp: i64) -> Result<GetResult> {
        let mut at = timestamp;
        let mut caps: Vec<(i64, i64)> = Vec::new();
        for level in levels {
            if let Some(fork) = level.fork {
                if at < fork {
                    let first = level.chunks.first();
                    let next = self.version_after(level, first, keyspace, key, fork)?;
                    caps.push((fork, next.unwrap_or(OPEN_END)));
                    continue;
                }
            }
            let chunk = level.chunks.chunk_for(at).ok_or_else(|| {
                Error::CorruptState(format!("branch {} has no chunk covering {at}", level.branch))
            })?;
            let found = self.chunk_lookup(&level.chunks.path_of(chunk), keyspace, key, at)?;
            let upper = match found.ceiling {
                Some(next) => next,
                None => self
                    .version_after(level, chunk, keyspace, key, at)?
                    .unwrap_or(OPEN_END),
            };
            let floor = if found.has_floor {
                Some(found)
            } else {
                self.version_before(level, chunk, keyspace, key, at)?
            };
            if let Some(floor) = floor {
                let period = Period::new(floor.result.period.lower(), apply_caps(upper, &caps))?;
                return Ok(GetResult {
                    value: floor.result.value,
                    period,
                });
            }
            match level.fork {
                Some(fork) => {
                    caps.push((fork, upper));
                    at = fork;
                }
                None => return Ok(GetResult::absent(Period::new(0, apply_caps(upper, &caps))?)),
            }
        }
        Err(Error::CorruptState("branch ancestry does not end at a root".to_string()))
    }

    /// Value of `key` on `branch` at `timestamp` and the period it holds for.
    pub fn get(&self, branch: &str, keyspace: &str, key: &str, timestamp: i64) -> Result<GetResult> {
        self.ensure_open()?;
        key::validate(keyspace, key, timestamp)?;
        let levels = self.branches.ancestry(branch)?;
        self.get_in(&levels, keyspace, key, timestamp)
    }

    pub fn exists(&self, branch: &str, keyspace: &str, key: &str, timestamp: i64) -> Result<bool> {
        Ok(self.get(branch, keyspace, key, timestamp)?.is_present())
    }

    fn open_raw(
        &self,
        definition: &IndexDefinition,
        range: &IndexRange,
        order: Order,
        path: &Path,
    ) -> Result<ChunkIndexCursor> {
        let txn = self.pool.read(path)?;
        Ok(ChunkIndexCursor::open(txn, definition, range, order, &self.cursors))
    }

    /// Build the cursor chain for `chain`, root-most link innermost.
    fn open_chain(
        &self,
        definition: &IndexDefinition,
        range: &IndexRange,
        order: Order,
        chain: Vec<ChainLink>,
    ) -> Result<Box<dyn IndexScanCursor>> {
        let mut links = chain.into_iter().rev();
        let deepest = links
            .next()
            .ok_or_else(|| Error::CorruptState("empty resolution chain".to_string()))?;
        let raw = self.open_raw(definition, range, order, &deepest.path)?;
        let mut cursor: Box<dyn IndexScanCursor> =
            Box::new(TimestampFilterCursor::new(Box::new(raw), deepest.timestamp));
        for link in links {
            let raw = match self.open_raw(definition, range, order, &link.path) {
                Ok(raw) => raw,
                Err(err) => {
                    cursor.close();
                    return Err(err);
                }
            };
            cursor = Box::new(DeltaCursor::new(cursor, Box::new(raw), link.timestamp)?);
        }
        Ok(cursor)
    }

    /// Scan of the whole index `index` as seen on `branch` at `timestamp`.
    ///
    /// The caller must close the returned cursor.
    pub fn open_index_scan(
        &self,
        branch: &str,
        timestamp: i64,
        index: &str,
        order: Order,
    ) -> Result<Box<dyn IndexScanCursor>> {
        self.open_index_scan_range(branch, timestamp, index, &IndexRange::all(), order)
    }

    /// Like [`open_index_scan`](Self::open_index_scan), restricted to values in `range`.
    pub fn open_index_scan_range(
        &self,
        branch: &str,
        timestamp: i64,
        index: &str,
        range: &IndexRange,
        order: Order,
    ) -> Result<Box<dyn IndexScanCursor>> {
        self.ensure_open()?;
        key::validate_timestamp(timestamp)?;
        let definition = self.index_definition(index)?;
        let levels = self.branches.ancestry(branch)?;
        let chain = resolution_chain(&levels, timestamp)?;
        self.open_chain(&definition, range, order, chain)
    }

    /// Timestamps at which `key` changed on `branch` within `period`,
    /// rollover carry-forwards excluded.
    pub fn history(
        &self,
        branch: &str,
        keyspace: &str,
        key: &str,
        period: &Period,
        order: Order,
    ) -> Result<Vec<i64>> {
        self.ensure_open()?;
        key::validate(keyspace, key, period.lower())?;
        let levels = self.branches.ancestry(branch)?;
        let store = matrix_name(keyspace);
        let mut out = Vec::new();
        for (level, range) in lineage_periods(&levels, period) {
            let lower = encode_ascending(key, range.lower());
            let upper = encode_ascending(key, range.upper());
            for chunk in level.chunks.chunks_in(&range) {
                let txn = self.pool.read(&level.chunks.path_of(chunk))?;
                let carried = chunk.carry_forward_timestamp();
                for (raw, _) in txn
                    .snapshot()
                    .range(&store, Bound::Included(lower.as_slice()), Bound::Excluded(upper.as_slice()))
                {
                    let (entry_key, timestamp) = decode_ascending(raw)?;
                    if entry_key == key && Some(timestamp) != carried {
                        out.push(timestamp);
                    }
                }
                txn.commit();
            }
        }
        out.sort_unstable();
        out.dedup();
        if order == Order::Descending {
            out.reverse();
        }
        Ok(out)
    }

    /// `(timestamp, key)` of every change in `keyspace` within `period`,
    /// rollover carry-forwards excluded.
    pub fn modifications(&self, branch: &str, keyspace: &str, period: &Period) -> Result<Vec<(i64, String)>> {
        self.ensure_open()?;
        key::validate_keyspace(keyspace)?;
        let levels = self.branches.ancestry(branch)?;
        let store = timeline_name(keyspace);
        let mut out = Vec::new();
        for (level, range) in lineage_periods(&levels, period) {
            let lower = encode_timeline(range.lower(), "");
            let upper = encode_timeline(range.upper(), "");
            for chunk in level.chunks.chunks_in(&range) {
                let txn = self.pool.read(&level.chunks.path_of(chunk))?;
                let carried = chunk.carry_forward_timestamp();
                for (raw, _) in txn
                    .snapshot()
                    .range(&store, Bound::Included(lower.as_slice()), Bound::Excluded(upper.as_slice()))
                {
                    let (timestamp, entry_key) = decode_timeline(raw)?;
                    if Some(timestamp) != carried {
                        out.push((timestamp, entry_key));
                    }
                }
                txn.commit();
            }
        }
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    /// Every version stored for `keyspace` within `period`, ordered by key
    /// then timestamp.
    ///
    /// Carry-forward versions are reported for the first chunk of the query
    /// branch overlapping `period` only.
    pub fn all_entries(
        &self,
        branch: &str,
        keyspace: &str,
        period: &Period,
    ) -> Result<Vec<(TemporalKey, Option<Vec<u8>>)>> {
        self.ensure_open()?;
        key::validate_keyspace(keyspace)?;
        let levels = self.branches.ancestry(branch)?;
        let store = matrix_name(keyspace);
        let first_visited = levels[0].chunks.chunks_in(period).first().map(|chunk| chunk.index);
        let mut entries = BTreeMap::new();
        for (depth, (level, range)) in lineage_periods(&levels, period).into_iter().enumerate() {
            for chunk in level.chunks.chunks_in(&range) {
                let keep_carried = depth == 0 && Some(chunk.index) == first_visited;
                let carried = chunk.carry_forward_timestamp();
                let txn = self.pool.read(&level.chunks.path_of(chunk))?;
                for (raw, value) in txn.snapshot().range(&store, Bound::Unbounded, Bound::Unbounded) {
                    let (entry_key, timestamp) = decode_ascending(raw)?;
                    if !range.contains(timestamp) || (Some(timestamp) == carried && !keep_carried) {
                        continue;
                    }
                    entries.entry((entry_key, timestamp)).or_insert_with(|| payload(value));
                }
                txn.commit();
            }
        }
        Ok(entries
            .into_iter()
            .map(|((key, timestamp), value)| {
                let key = TemporalKey {
                    keyspace: keyspace.to_string(),
                    key,
                    timestamp,
                };
                (key, value)
            })
            .collect())
    }

    /// Keys with a value on `branch` at `timestamp`, with those values.
    fn live_entries(&self, levels: &[Level], keyspace: &str, timestamp: i64) -> Result<Vec<(String, Vec<u8>)>> {
        let store = matrix_name(keyspace);
        let mut candidates = BTreeSet::new();
        for link in resolution_chain(levels, timestamp)? {
            let txn = self.pool.read(&link.path)?;
            for (raw, _) in txn.snapshot().range(&store, Bound::Unbounded, Bound::Unbounded) {
                let (entry_key, version) = decode_ascending(raw)?;
                if version <= link.timestamp {
                    candidates.insert(entry_key);
                }
            }
            txn.commit();
        }
        let mut live = Vec::new();
        for key in candidates {
            if let Some(value) = self.get_in(levels, keyspace, &key, timestamp)?.value {
                live.push((key, value));
            }
        }
        Ok(live)
    }

    /// Keys of `keyspace` holding a value on `branch` at `timestamp`, sorted.
    pub fn keys(&self, branch: &str, keyspace: &str, timestamp: i64) -> Result<Vec<String>> {
        self.ensure_open()?;
        key::validate_keyspace(keyspace)?;
        key::validate_timestamp(timestamp)?;
        let levels = self.branches.ancestry(branch)?;
        Ok(self
            .live_entries(&levels, keyspace, timestamp)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    fn keyspaces_in(&self, levels: &[Level], timestamp: i64) -> Result<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        for link in resolution_chain(levels, timestamp)? {
            let txn = self.pool.read(&link.path)?;
            out.extend(
                txn.snapshot()
                    .store_names()
                    .iter()
                    .filter_map(|store| keyspace_of_matrix(store))
                    .map(str::to_string),
            );
            txn.commit();
        }
        Ok(out)
    }

    /// Keyspaces with stored versions visible from `branch` at `timestamp`.
    pub fn keyspaces(&self, branch: &str, timestamp: i64) -> Result<Vec<String>> {
        self.ensure_open()?;
        key::validate_timestamp(timestamp)?;
        let levels = self.branches.ancestry(branch)?;
        Ok(self.keyspaces_in(&levels, timestamp)?.into_iter().collect())
    }

    /// Commit timestamps of `branch` and the ancestor commits it sees within
    /// `period`, rollover carry-forwards excluded.
    pub fn commits(&self, branch: &str, period: &Period, order: Order) -> Result<Vec<i64>> {
        self.ensure_open()?;
        let levels = self.branches.ancestry(branch)?;
        let mut out = Vec::new();
        for (level, range) in lineage_periods(&levels, period) {
            // inverted keys: newest commit first
            let lower = encode_commit(range.upper() - 1);
            let upper = encode_commit(range.lower());
            for chunk in level.chunks.chunks_in(&range) {
                let txn = self.pool.read(&level.chunks.path_of(chunk))?;
                let carried = chunk.carry_forward_timestamp();
                for (raw, _) in txn
                    .snapshot()
                    .range(COMMIT_LOG, Bound::Included(lower.as_slice()), Bound::Included(upper.as_slice()))
                {
                    let timestamp = decode_commit(raw)?;
                    if Some(timestamp) != carried {
                        out.push(timestamp);
                    }
                }
                txn.commit();
            }
        }
        out.sort_unstable();
        out.dedup();
        if order == Order::Descending {
            out.reverse();
        }
        Ok(out)
    }

    // ---- writes ----

    fn write_index_lock(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.index_lock
            .write()
            .map_err(|_| Error::Closed("index lock poisoned"))
    }

    fn read_index_lock(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.index_lock
            .read()
            .map_err(|_| Error::Closed("index lock poisoned"))
    }

    /// Definitions of every index `batch` touches, checked against the values.
    fn batch_indexes(&self, batch: &WriteBatch) -> Result<BTreeMap<String, IndexDefinition>> {
        let registry = self.read_indexes()?;
        let mut out = BTreeMap::new();
        for change in batch.index_changes() {
            let (IndexChange::Add { index, value, .. } | IndexChange::Remove { index, value, .. }) = change;
            let definition = registry
                .get(index)
                .ok_or_else(|| Error::IndexNotFound(index.clone()))?;
            if value.kind() != definition.kind {
                return Err(Error::precondition(format!(
                    "index {index} holds {:?} values, got {:?}",
                    definition.kind,
                    value.kind()
                )));
            }
            out.insert(index.clone(), definition.clone());
        }
        Ok(out)
    }

    /// Whether `(value, primary_key)` is in the index view of `levels` at `timestamp`.
    fn pair_visible(
        &self,
        levels: &[Level],
        definition: &IndexDefinition,
        value: &IndexValue,
        primary_key: &str,
        timestamp: i64,
    ) -> Result<bool> {
        let chain = resolution_chain(levels, timestamp)?;
        let mut cursor = self.open_chain(definition, &IndexRange::exact(value.clone()), Order::Ascending, chain)?;
        let entries = cursor.collect_entries()?;
        Ok(entries.iter().any(|(_, pk)| pk == primary_key))
    }

    /// Write the index side of a commit into the active chunk.
    ///
    /// Adding a visible pair or removing an invisible one is a no-op. On a
    /// branch's first chunk a pair without local entries is inherited from
    /// the parent view at the fork; removing it writes a local entry that
    /// starts at the fork and ends at `timestamp`.
    fn apply_index_changes(
        &self,
        txn: &mut WriteTxn,
        levels: &[Level],
        definitions: &BTreeMap<String, IndexDefinition>,
        batch: &WriteBatch,
        timestamp: i64,
    ) -> Result<()> {
        let active = levels[0].chunks.active();
        let delta_fork = levels[0].fork.filter(|_| active.is_first());
        for change in batch.final_index_changes() {
            let (IndexChange::Add { index, value, primary_key }
            | IndexChange::Remove { index, value, primary_key }) = change;
            let definition = definitions
                .get(index)
                .ok_or_else(|| Error::IndexNotFound(index.clone()))?;
            let store = definition.store_name();

            let prefix = entry_prefix(value, primary_key);
            let upper = prefix_successor(&prefix);
            let upper_bound = match &upper {
                Some(next) => Bound::Excluded(next.as_slice()),
                None => Bound::Unbounded,
            };
            let mut has_local = false;
            let mut open_lower = None;
            for (raw_key, raw_value) in txn
                .snapshot()
                .range(&store, Bound::Included(prefix.as_slice()), upper_bound)
            {
                let entry = decode_entry(definition.kind, raw_key, raw_value)?;
                has_local = true;
                if entry.period.is_open_ended() {
                    open_lower = Some(entry.period.lower());
                }
            }
            let inherited = match delta_fork {
                Some(fork) if !has_local => self.pair_visible(&levels[1..], definition, value, primary_key, fork)?,
                _ => false,
            };

            match (change, open_lower) {
                (IndexChange::Add { .. }, Some(_)) => {}
                (IndexChange::Add { .. }, None) => {
                    if !inherited {
                        txn.put(&store, encode_entry_key(value, primary_key, timestamp), encode_upper(OPEN_END));
                    }
                }
                (IndexChange::Remove { .. }, Some(lower)) => {
                    txn.put(&store, encode_entry_key(value, primary_key, lower), encode_upper(timestamp));
                }
                (IndexChange::Remove { .. }, None) => {
                    if let (true, Some(fork)) = (inherited, delta_fork) {
                        txn.put(&store, encode_entry_key(value, primary_key, fork), encode_upper(timestamp));
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply `batch` to `branch` atomically and return its commit timestamp.
    pub fn commit(&self, branch: &str, batch: &WriteBatch) -> Result<i64> {
        self.ensure_open()?;
        batch.validate()?;
        let definitions = self.batch_indexes(batch)?;
        let branch = self.branches.get(branch)?;
        let _writes = branch.lock_writes()?;

        let timestamp = {
            let _indexes = if batch.has_index_changes() {
                Some(self.write_index_lock()?)
            } else {
                None
            };
            let timestamp = self.timestamps.next_commit_timestamp(branch.now()?)?;
            let levels = self.branches.ancestry(branch.name())?;
            let chunks = &levels[0].chunks;
            let mut txn = self.pool.write(&chunks.path_of(chunks.active()))?;
            for ((keyspace, key), value) in batch.final_mutations() {
                let value = value.map(<[u8]>::to_vec).unwrap_or_default();
                txn.put(&matrix_name(keyspace), encode_ascending(key, timestamp), value);
                txn.put(&timeline_name(keyspace), encode_timeline(timestamp, key), Vec::new());
            }
            txn.put(COMMIT_LOG, encode_commit(timestamp), Vec::new());
            if batch.has_index_changes() {
                self.apply_index_changes(&mut txn, &levels, &definitions, batch, timestamp)?;
            }
            txn.commit()?;
            branch.advance_now(timestamp)?;
            timestamp
        };
        log::debug!("committed {} changes to {} at {timestamp}", batch.len(), branch.name());

        self.maybe_rollover(&branch, timestamp)?;
        Ok(timestamp)
    }

    /// Evaluate the rollover policy after a commit at `timestamp`.
    /// The caller holds the branch write lock.
    fn maybe_rollover(&self, branch: &Branch, timestamp: i64) -> Result<()> {
        if self.config.rollover_policy == RolloverPolicy::Never {
            return Ok(());
        }
        let chunks = branch.chunks()?;
        let active = chunks.active();
        let (size_bytes, entries) = self.pool.usage(&chunks.path_of(active))?;
        let stats = ChunkStats {
            entries,
            size_bytes,
            age_millis: timestamp - active.created_at,
        };
        if should_rollover(&self.config.rollover_policy, active, &stats) {
            log::debug!("rollover policy fired for {} chunk {}: {stats:?}", branch.name(), active.index);
            self.rollover_locked(branch)?;
        }
        Ok(())
    }

    /// Close the active chunk of `branch` and carry its head state into a new one.
    pub fn rollover(&self, branch: &str) -> Result<ChunkInfo> {
        self.ensure_open()?;
        let branch = self.branches.get(branch)?;
        let _writes = branch.lock_writes()?;
        self.rollover_locked(&branch)
    }

    fn rollover_locked(&self, branch: &Branch) -> Result<ChunkInfo> {
        let _indexes = self.read_index_lock()?;
        let timestamp = self.timestamps.next_commit_timestamp(branch.now()?)?;
        let levels = self.branches.ancestry(branch.name())?;
        let chunks = &levels[0].chunks;
        let active = chunks.active();

        let mut carried = Vec::new();
        for keyspace in self.keyspaces_in(&levels, timestamp)? {
            for (key, value) in self.live_entries(&levels, &keyspace, timestamp)? {
                carried.push((keyspace.clone(), key, value));
            }
        }
        let definitions: Vec<IndexDefinition> = self.read_indexes()?.values().cloned().collect();
        let mut carried_indexes = Vec::new();
        for definition in definitions {
            let chain = resolution_chain(&levels, timestamp)?;
            let mut cursor = self.open_chain(&definition, &IndexRange::all(), Order::Ascending, chain)?;
            let entries = cursor.collect_entries()?;
            carried_indexes.push((definition, entries));
        }

        let next_path = chunk_path(chunks.branch_dir(), active.index + 1);
        if next_path.exists() {
            if next_path.join(CHUNK_META_FILE).exists() {
                return Err(Error::CorruptState(format!(
                    "{} already exists ahead of the open chunk",
                    next_path.display()
                )));
            }
            log::warn!("removing incomplete chunk {}", next_path.display());
            self.pool.discard(&next_path)?;
            std::fs::remove_dir_all(&next_path)?;
        }

        let mut txn = self.pool.write(&next_path)?;
        for (keyspace, key, value) in &carried {
            txn.put(&matrix_name(keyspace), encode_ascending(key, timestamp), value.clone());
            txn.put(&timeline_name(keyspace), encode_timeline(timestamp, key), Vec::new());
        }
        txn.put(COMMIT_LOG, encode_commit(timestamp), Vec::new());
        for (definition, entries) in &carried_indexes {
            let store = definition.store_name();
            for (value, primary_key) in entries {
                txn.put(&store, encode_entry_key(value, primary_key, timestamp), encode_upper(OPEN_END));
            }
        }
        txn.commit()?;

        branch.advance_now(timestamp)?;
        let next = branch.roll(timestamp, self.clock.now_millis())?;
        log::info!(
            "carried {} keys and {} index entries into chunk {} of {}",
            carried.len(),
            carried_indexes.iter().map(|(_, entries)| entries.len()).sum::<usize>(),
            next.index,
            branch.name()
        );
        Ok(next)
    }

    // ---- branches, chunks, indexes ----

    /// Fork `name` from `parent` at `branching_timestamp`, by default the
    /// parent's latest commit.
    pub fn create_branch(&self, name: &str, parent: &str, branching_timestamp: Option<i64>) -> Result<BranchInfo> {
        self.ensure_open()?;
        let timestamp = match branching_timestamp {
            Some(timestamp) => timestamp,
            None => self.branches.get(parent)?.now()?,
        };
        self.branches
            .create(name, parent, timestamp, self.clock.now_millis())?
            .info()
    }

    pub fn branches(&self) -> Result<Vec<BranchInfo>> {
        self.ensure_open()?;
        self.branches.infos()
    }

    pub fn branch(&self, name: &str) -> Result<BranchInfo> {
        self.ensure_open()?;
        self.branches.get(name)?.info()
    }

    pub fn chunks(&self, branch: &str) -> Result<Vec<ChunkInfo>> {
        self.ensure_open()?;
        Ok(self.branches.get(branch)?.chunks()?.chunks().to_vec())
    }

    /// Register index `name`. Defining an existing index again with the same
    /// kind returns it unchanged.
    pub fn define_index(&self, name: &str, kind: IndexKind) -> Result<IndexDefinition> {
        self.ensure_open()?;
        if name.is_empty() {
            return Err(Error::precondition("index name must be non-empty"));
        }
        {
            let mut registry = self
                .indexes
                .write()
                .map_err(|_| Error::Closed("index registry lock poisoned"))?;
            if let Some(existing) = registry.get(name) {
                if existing.kind != kind {
                    return Err(Error::precondition(format!(
                        "index {name} already defined as {:?}",
                        existing.kind
                    )));
                }
                return Ok(existing.clone());
            }
            registry.insert(name.to_string(), IndexDefinition::new(name, kind));
        }
        self.persist_meta()?;
        log::info!("defined index {name} ({kind:?})");
        Ok(IndexDefinition::new(name, kind))
    }

    pub fn indexes(&self) -> Result<Vec<IndexDefinition>> {
        Ok(self.read_indexes()?.values().cloned().collect())
    }

    /// A fresh commit timestamp for `branch`, without committing anything.
    pub fn next_commit_timestamp(&self, branch: &str) -> Result<i64> {
        self.ensure_open()?;
        let branch = self.branches.get(branch)?;
        self.timestamps.next_commit_timestamp(branch.now()?)
    }

    pub fn timestamp_provider(&self) -> Arc<CommitTimestampProvider> {
        Arc::clone(&self.timestamps)
    }

    /// Lock that index maintenance takes for writing and rollover for
    /// reading. Hold it for reading to keep the index view stable.
    pub fn index_lock(&self) -> &RwLock<()> {
        &self.index_lock
    }

    /// Raw index cursors currently open against this store.
    pub fn open_cursors(&self) -> usize {
        self.cursors.open_cursors()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        self.ensure_open()?;
        self.pool.sweep()
    }

    /// Shut down the pool. Later operations fail with [`Error::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let leaked = self.cursors.open_cursors();
        if leaked > 0 {
            log::warn!("closing store {} with {leaked} open index cursors", self.root.display());
        }
        self.pool.shutdown();
        log::info!("closed temporal store {}", self.root.display());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for TemporalStore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TemporalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalStore")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::MASTER;
    use crate::clock::ManualClock;
    use tempfile::tempdir;

    fn store_at(dir: &Path, start: i64) -> (TemporalStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let config = StoreConfig {
            pool: crate::config::PoolConfig {
                keep_open: 8,
                sweep_interval_ms: 0,
            },
            ..StoreConfig::default()
        };
        let store = TemporalStore::open_with_clock(dir, config, clock.clone()).expect("store");
        (store, clock)
    }

    fn put(store: &TemporalStore, branch: &str, key: &str, value: &str) -> i64 {
        let mut batch = WriteBatch::new();
        batch.put("ns", key, value);
        store.commit(branch, &batch).expect("commit")
    }

    #[test]
    fn test_get_periods_follow_versions() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let (store, _clock) = store_at(dir.path(), 100);
        let t1 = put(&store, MASTER, "foo", "bar");
        let t2 = put(&store, MASTER, "foo", "baz");

        let before = store.get(MASTER, "ns", "foo", t1 - 1)?;
        assert_eq!(before, GetResult::absent(Period::up_to(t1)?));
        let first = store.get(MASTER, "ns", "foo", t1)?;
        assert_eq!(first.value.as_deref(), Some(&b"bar"[..]));
        assert_eq!(first.period, Period::new(t1, t2)?);
        let second = store.get(MASTER, "ns", "foo", t2 + 50)?;
        assert_eq!(second.value.as_deref(), Some(&b"baz"[..]));
        assert_eq!(second.period, Period::starting_at(t2)?);

        assert_eq!(store.get(MASTER, "ns", "never", t2)?, GetResult::absent(Period::eternal()));
        Ok(())
    }

    #[test]
    fn test_branch_period_ends_at_local_change() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let (store, _clock) = store_at(dir.path(), 100);
        let t1 = put(&store, MASTER, "foo", "a");
        let fork = put(&store, MASTER, "other", "x");
        store.create_branch("dev", MASTER, None)?;
        let t_master = put(&store, MASTER, "foo", "b");
        let t_dev = put(&store, "dev", "foo", "c");
        assert!(t_dev > t_master);

        let inherited = store.get("dev", "ns", "foo", fork)?;
        assert_eq!(inherited.value.as_deref(), Some(&b"a"[..]));
        assert_eq!(inherited.period, Period::new(t1, t_dev)?);
        // queried before the fork, the value still ends where dev diverges
        let early = store.get("dev", "ns", "foo", t1)?;
        assert_eq!(early.value.as_deref(), Some(&b"a"[..]));
        assert_eq!(early.period, Period::new(t1, t_dev)?);
        assert_eq!(store.get(MASTER, "ns", "foo", t1)?.period, Period::new(t1, t_master)?);
        assert_eq!(store.get("dev", "ns", "foo", t_dev)?.period, Period::starting_at(t_dev)?);
        Ok(())
    }

    #[test]
    fn test_lineage_periods_cap_at_child_fork() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let (store, _clock) = store_at(dir.path(), 100);
        put(&store, MASTER, "k", "v");
        store.create_branch("a", MASTER, None)?;
        let levels = store.branches.ancestry("a")?;
        let fork = levels[0].fork.expect("fork");
        let periods = lineage_periods(&levels, &Period::eternal());
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].1, Period::eternal());
        assert_eq!(periods[1].1, Period::new(0, fork + 1)?);
        Ok(())
    }

    #[test]
    fn test_closed_store_rejects_operations() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let (store, _clock) = store_at(dir.path(), 100);
        put(&store, MASTER, "foo", "bar");
        store.close();
        assert!(store.get(MASTER, "ns", "foo", 200).unwrap_err().is_closed());
        assert!(store.commit(MASTER, WriteBatch::new().put("ns", "x", "y")).unwrap_err().is_closed());
        Ok(())
    }

    #[test]
    fn test_index_kind_must_match() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let (store, _clock) = store_at(dir.path(), 100);
        store.define_index("age", IndexKind::Long)?;
        assert!(store.define_index("age", IndexKind::Double).unwrap_err().is_precondition());
        let mut batch = WriteBatch::new();
        batch.index("age", IndexValue::string("ten"), "alice");
        assert!(store.commit(MASTER, &batch).unwrap_err().is_precondition());
        let mut batch = WriteBatch::new();
        batch.index("height", IndexValue::Long(1), "alice");
        assert!(matches!(store.commit(MASTER, &batch), Err(Error::IndexNotFound(_))));
        Ok(())
    }
}
