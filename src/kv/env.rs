//! Chunk environments: named ordered stores with snapshot reads.
//!
//! An environment owns a set of named stores, each an ordered map from byte
//! keys to byte values. Readers work on an immutable [`Snapshot`]; a commit
//! copies only the stores it touches and publishes a new snapshot. When the
//! environment is backed by a directory, every commit is first appended to
//! `data.log` and the log is replayed on open.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::kv::mmap::MappedLog;
use crate::kv::record::{
    decode_payload, encode_payload, RecordHeader, OP_COMMIT, OP_PUT, RECORD_HEADER_SIZE,
};
use crate::kv::txn::{ReadTxn, TxnPin, WriteTxn};
use crate::{Error, Result};

pub const LOG_FILE: &str = "data.log";

pub(crate) type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// One buffered write of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Put {
    pub store: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

type Tables = BTreeMap<String, Arc<Table>>;

fn apply_puts(tables: &mut Tables, puts: &[Put]) {
    for put in puts {
        let table = tables.entry(put.store.clone()).or_default();
        Arc::make_mut(table).insert(put.key.clone(), put.value.clone());
    }
}

/// Immutable view of every store of an environment at one commit.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    stores: Arc<Tables>,
}

impl Snapshot {
    pub(crate) fn table(&self, store: &str) -> Option<Arc<Table>> {
        self.stores.get(store).cloned()
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    pub fn get(&self, store: &str, key: &[u8]) -> Option<&[u8]> {
        self.stores
            .get(store)
            .and_then(|table| table.get(key))
            .map(Vec::as_slice)
    }

    /// Greatest entry with key `<= key`.
    pub fn floor_entry(&self, store: &str, key: &[u8]) -> Option<(&[u8], &[u8])> {
        let table = self.stores.get(store)?;
        table
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Least entry with key `> key`.
    pub fn higher_entry(&self, store: &str, key: &[u8]) -> Option<(&[u8], &[u8])> {
        let table = self.stores.get(store)?;
        table
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Entries of `store` within the byte bounds, ascending.
    pub fn range<'a>(
        &'a self,
        store: &str,
        lower: Bound<&'a [u8]>,
        upper: Bound<&'a [u8]>,
    ) -> Box<dyn DoubleEndedIterator<Item = (&'a [u8], &'a [u8])> + 'a> {
        match self.stores.get(store) {
            Some(table) => Box::new(
                table
                    .range::<[u8], _>((lower, upper))
                    .map(|(k, v)| (k.as_slice(), v.as_slice())),
            ),
            None => Box::new(std::iter::empty()),
        }
    }

    pub fn len(&self, store: &str) -> usize {
        self.stores.get(store).map_or(0, |table| table.len())
    }

    /// Copies a table only while another snapshot still shares it.
    fn apply(mut self, puts: &[Put]) -> Snapshot {
        apply_puts(Arc::make_mut(&mut self.stores), puts);
        self
    }
}

/// One chunk's storage.
pub struct Environment {
    path: Option<PathBuf>,
    current: RwLock<Snapshot>,
    log: Mutex<Option<File>>,
    size_bytes: AtomicU64,
    entry_count: AtomicU64,
    sync_on_commit: bool,
}

impl Environment {
    /// Open (or create) a directory-backed environment, replaying its log.
    pub fn open(dir: impl AsRef<Path>, sync_on_commit: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let log_path = dir.join(LOG_FILE);

        let (snapshot, committed_len, entries) = replay(&log_path)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&log_path)?;
        if file.metadata()?.len() != committed_len {
            log::warn!(
                "truncating torn tail of {} to {} bytes",
                log_path.display(),
                committed_len
            );
            file.set_len(committed_len)?;
            file.sync_all()?;
        }
        let mut file = file;
        file.seek(SeekFrom::End(0))?;

        log::debug!(
            "opened environment {} ({} entries, {} bytes)",
            dir.display(),
            entries,
            committed_len
        );
        Ok(Self {
            path: Some(dir),
            current: RwLock::new(snapshot),
            log: Mutex::new(Some(file)),
            size_bytes: AtomicU64::new(committed_len),
            entry_count: AtomicU64::new(entries),
            sync_on_commit,
        })
    }

    /// Environment without a backing log.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: RwLock::new(Snapshot::default()),
            log: Mutex::new(None),
            size_bytes: AtomicU64::new(0),
            entry_count: AtomicU64::new(0),
            sync_on_commit: false,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| Error::Corrupt("environment lock poisoned"))
    }

    /// Bytes appended to the log (or payload bytes, in memory).
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Acquire)
    }

    /// Number of put records applied.
    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::Acquire)
    }

    pub fn begin_read(&self) -> Result<ReadTxn> {
        Ok(ReadTxn::new(self.snapshot()?, None))
    }

    pub fn begin_write(self: &Arc<Self>) -> Result<WriteTxn> {
        Ok(WriteTxn::new(Arc::clone(self), self.snapshot()?, None))
    }

    pub(crate) fn begin_read_pinned(&self, pin: TxnPin) -> Result<ReadTxn> {
        Ok(ReadTxn::new(self.snapshot()?, Some(pin)))
    }

    pub(crate) fn begin_write_pinned(self: &Arc<Self>, pin: TxnPin) -> Result<WriteTxn> {
        Ok(WriteTxn::new(Arc::clone(self), self.snapshot()?, Some(pin)))
    }

    /// Append `puts` as one transaction and publish the resulting snapshot.
    pub(crate) fn apply(&self, puts: &[Put]) -> Result<()> {
        if puts.is_empty() {
            return Ok(());
        }
        let mut log = self
            .log
            .lock()
            .map_err(|_| Error::Corrupt("environment log lock poisoned"))?;

        let mut buf = Vec::new();
        for put in puts {
            let payload = encode_payload(&put.store, &put.key, &put.value);
            buf.extend_from_slice(&RecordHeader::new(OP_PUT, &payload).to_bytes());
            buf.extend_from_slice(&payload);
        }
        buf.extend_from_slice(&RecordHeader::new(OP_COMMIT, &[]).to_bytes());

        if let Some(file) = log.as_mut() {
            let sync = self.sync_on_commit;
            write_or_rewind(
                file,
                self.size_bytes(),
                |file| {
                    file.write_all(&buf)?;
                    if sync {
                        file.sync_data()?;
                    }
                    Ok(())
                },
                |file, len| file.set_len(len),
            )?;
        }

        let mut current = self
            .current
            .write()
            .map_err(|_| Error::Corrupt("environment lock poisoned"))?;
        let previous = std::mem::take(&mut *current);
        *current = previous.apply(puts);
        self.size_bytes.fetch_add(buf.len() as u64, Ordering::AcqRel);
        self.entry_count.fetch_add(puts.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    /// Flush the log to disk.
    pub fn sync(&self) -> Result<()> {
        let log = self
            .log
            .lock()
            .map_err(|_| Error::Corrupt("environment log lock poisoned"))?;
        if let Some(file) = log.as_ref() {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Run `write` at the end of the log. If it fails, cut the log back to
/// `committed` bytes so a partial record never precedes a later commit.
fn write_or_rewind<F, W, T>(file: &mut F, committed: u64, write: W, truncate: T) -> Result<()>
where
    F: Seek,
    W: FnOnce(&mut F) -> std::io::Result<()>,
    T: FnOnce(&mut F, u64) -> std::io::Result<()>,
{
    if let Err(err) = write(file) {
        log::warn!("log append failed, rewinding to {committed} bytes: {err}");
        truncate(file, committed)?;
        file.seek(SeekFrom::Start(committed))?;
        return Err(err.into());
    }
    Ok(())
}

/// Rebuild the snapshot from the log; returns it with the committed length.
fn replay(path: &Path) -> Result<(Snapshot, u64, u64)> {
    let Some(mapped) = MappedLog::open(path)? else {
        return Ok((Snapshot::default(), 0, 0));
    };
    let bytes = mapped.as_slice();
    let mut tables = Tables::new();
    let mut pending = Vec::new();
    let mut offset = 0usize;
    let mut committed = 0usize;
    let mut entries = 0u64;

    while offset + RECORD_HEADER_SIZE <= mapped.len() {
        let header = RecordHeader::from_bytes(&bytes[offset..offset + RECORD_HEADER_SIZE])?;
        let Ok(payload) = mapped.range(offset + RECORD_HEADER_SIZE, header.length as usize) else {
            break;
        };
        if header.validate_crc(payload).is_err() {
            break;
        }
        offset += RECORD_HEADER_SIZE + payload.len();
        match header.op {
            OP_PUT => {
                let (store, key, value) = decode_payload(payload)?;
                pending.push(Put {
                    store: store.to_string(),
                    key: key.to_vec(),
                    value: value.to_vec(),
                });
            }
            OP_COMMIT => {
                entries += pending.len() as u64;
                apply_puts(&mut tables, &pending);
                pending.clear();
                committed = offset;
            }
            _ => return Err(Error::Corrupt("unknown record op")),
        }
    }

    if !pending.is_empty() || committed != mapped.len() {
        log::warn!(
            "{}: discarding {} uncommitted records after offset {}",
            path.display(),
            pending.len(),
            committed
        );
    }
    let snapshot = Snapshot {
        stores: Arc::new(tables),
    };
    Ok((snapshot, committed as u64, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(store: &str, key: &[u8], value: &[u8]) -> Put {
        Put {
            store: store.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_floor_and_higher() {
        let env = Environment::in_memory();
        env.apply(&[put("s", b"b", b"1"), put("s", b"d", b"2")]).unwrap();
        let snap = env.snapshot().unwrap();
        assert_eq!(snap.floor_entry("s", b"c"), Some((&b"b"[..], &b"1"[..])));
        assert_eq!(snap.floor_entry("s", b"b"), Some((&b"b"[..], &b"1"[..])));
        assert_eq!(snap.floor_entry("s", b"a"), None);
        assert_eq!(snap.higher_entry("s", b"b"), Some((&b"d"[..], &b"2"[..])));
        assert_eq!(snap.higher_entry("s", b"d"), None);
        assert_eq!(snap.floor_entry("missing", b"z"), None);
    }

    #[test]
    fn test_snapshots_are_isolated() {
        let env = Environment::in_memory();
        env.apply(&[put("s", b"a", b"1")]).unwrap();
        let before = env.snapshot().unwrap();
        env.apply(&[put("s", b"a", b"2")]).unwrap();
        assert_eq!(before.get("s", b"a"), Some(&b"1"[..]));
        assert_eq!(env.snapshot().unwrap().get("s", b"a"), Some(&b"2"[..]));
    }

    #[test]
    fn test_replay_after_reopen() -> Result<()> {
        let dir = TempDir::new().unwrap();
        {
            let env = Environment::open(dir.path(), true)?;
            env.apply(&[put("s", b"a", b"1"), put("t", b"b", b"2")])?;
            env.apply(&[put("s", b"a", b"3")])?;
        }
        let env = Environment::open(dir.path(), true)?;
        let snap = env.snapshot()?;
        assert_eq!(snap.get("s", b"a"), Some(&b"3"[..]));
        assert_eq!(snap.get("t", b"b"), Some(&b"2"[..]));
        assert_eq!(env.entry_count(), 3);
        Ok(())
    }

    #[test]
    fn test_commit_updates_unshared_table_in_place() -> Result<()> {
        let env = Environment::in_memory();
        env.apply(&[put("s", b"a", b"1")])?;
        let before = env.snapshot()?.table("s").map(|table| Arc::as_ptr(&table));
        env.apply(&[put("s", b"b", b"2")])?;
        let after = env.snapshot()?.table("s").map(|table| Arc::as_ptr(&table));
        assert_eq!(before, after);

        let held = env.snapshot()?;
        env.apply(&[put("s", b"c", b"3")])?;
        let copied = env.snapshot()?.table("s").map(|table| Arc::as_ptr(&table));
        assert_ne!(after, copied);
        assert_eq!(held.get("s", b"c"), None);
        assert_eq!(held.len("s"), 2);
        Ok(())
    }

    #[test]
    fn test_failed_append_is_rewound_before_next_commit() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join(LOG_FILE);
        {
            let env = Environment::open(dir.path(), false)?;
            env.apply(&[put("s", b"a", b"1")])?;
            let committed = env.size_bytes();
            {
                let mut log = env.log.lock().unwrap();
                let file = log.as_mut().unwrap();
                let result = write_or_rewind(
                    file,
                    committed,
                    |file| {
                        file.write_all(&[0xAB; 7])?;
                        Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"))
                    },
                    |file, len| file.set_len(len),
                );
                assert!(matches!(result, Err(Error::Io(_))));
            }
            assert_eq!(std::fs::metadata(&log_path)?.len(), committed);
            env.apply(&[put("s", b"b", b"2")])?;
        }

        let env = Environment::open(dir.path(), false)?;
        let snap = env.snapshot()?;
        assert_eq!(snap.get("s", b"a"), Some(&b"1"[..]));
        assert_eq!(snap.get("s", b"b"), Some(&b"2"[..]));
        assert_eq!(std::fs::metadata(&log_path)?.len(), env.size_bytes());
        Ok(())
    }

    #[test]
    fn test_torn_tail_is_discarded() -> Result<()> {
        let dir = TempDir::new().unwrap();
        {
            let env = Environment::open(dir.path(), true)?;
            env.apply(&[put("s", b"a", b"1")])?;
        }
        let log_path = dir.path().join(LOG_FILE);
        let committed = std::fs::metadata(&log_path)?.len();
        {
            let mut file = OpenOptions::new().append(true).open(&log_path)?;
            let payload = encode_payload("s", b"b", b"2");
            file.write_all(&RecordHeader::new(OP_PUT, &payload).to_bytes())?;
            file.write_all(&payload)?;
        }

        let env = Environment::open(dir.path(), true)?;
        assert_eq!(env.snapshot()?.get("s", b"b"), None);
        assert_eq!(std::fs::metadata(&log_path)?.len(), committed);
        env.apply(&[put("s", b"c", b"3")])?;
        drop(env);
        let env = Environment::open(dir.path(), true)?;
        assert_eq!(env.snapshot()?.get("s", b"c"), Some(&b"3"[..]));
        Ok(())
    }
}
