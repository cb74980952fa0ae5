//! Temporal resolution of a key from its floor and ceiling versions.

use std::ops::Bound;

use crate::index::prefix_successor;
use crate::key::{self, decode_ascending, encode_ascending, matrix_name};
use crate::kv::Snapshot;
use crate::period::Period;
use crate::{Error, Result};

/// Value of a key at a timestamp together with the period it holds for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResult {
    pub value: Option<Vec<u8>>,
    pub period: Period,
}

impl GetResult {
    pub fn absent(period: Period) -> Self {
        Self {
            value: None,
            period,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// Raw `(encoded key, value)` entry as returned by the substrate.
pub type RawEntry<'a> = (&'a [u8], &'a [u8]);

fn timestamp_if_same_key(entry: Option<RawEntry<'_>>, key: &str) -> Result<Option<(i64, Vec<u8>)>> {
    let Some((raw_key, raw_value)) = entry else {
        return Ok(None);
    };
    let (entry_key, timestamp) = decode_ascending(raw_key)?;
    if entry_key != key {
        return Ok(None);
    }
    Ok(Some((timestamp, raw_value.to_vec())))
}

/// Turn the floor (`<= timestamp`) and ceiling (`> timestamp`) versions of
/// `key` into a value and validity period.
///
/// Entries belonging to another key count as missing. A zero-length payload
/// is a deletion and resolves to an absent value.
pub fn resolve(
    keyspace: &str,
    key: &str,
    timestamp: i64,
    floor: Option<RawEntry<'_>>,
    ceiling: Option<RawEntry<'_>>,
) -> Result<GetResult> {
    key::validate(keyspace, key, timestamp)?;
    let floor = timestamp_if_same_key(floor, key)?;
    let ceiling = timestamp_if_same_key(ceiling, key)?.map(|(ts, _)| ts);

    if let Some((floor_ts, _)) = &floor {
        if *floor_ts > timestamp {
            return Err(Error::precondition(format!(
                "floor entry at {floor_ts} lies after query timestamp {timestamp}"
            )));
        }
    }
    if let Some(ceil_ts) = ceiling {
        if ceil_ts <= timestamp {
            return Err(Error::precondition(format!(
                "ceiling entry at {ceil_ts} does not lie after query timestamp {timestamp}"
            )));
        }
    }

    match (floor, ceiling) {
        (None, None) => Ok(GetResult::absent(Period::eternal())),
        (None, Some(ceil_ts)) => Ok(GetResult::absent(Period::up_to(ceil_ts)?)),
        (Some((floor_ts, payload)), ceiling) => {
            let value = if payload.is_empty() { None } else { Some(payload) };
            let period = match ceiling {
                None => Period::starting_at(floor_ts)?,
                Some(ceil_ts) => {
                    if floor_ts >= ceil_ts {
                        return Err(Error::CorruptState(format!(
                            "{keyspace}/{key}: floor timestamp {floor_ts} >= ceiling timestamp {ceil_ts}"
                        )));
                    }
                    Period::new(floor_ts, ceil_ts)?
                }
            };
            Ok(GetResult { value, period })
        }
    }
}

/// Resolution inside one chunk, remembering whether a local version exists.
#[derive(Debug, Clone)]
pub(crate) struct ChunkLookup {
    pub result: GetResult,
    pub has_floor: bool,
    pub ceiling: Option<i64>,
}

/// Versions of `key` are exactly the matrix entries starting with the key
/// bytes; other keys sharing the prefix are skipped.
fn key_upper_bound(key: &str) -> Bound<Vec<u8>> {
    match prefix_successor(key.as_bytes()) {
        Some(next) => Bound::Excluded(next),
        None => Bound::Unbounded,
    }
}

fn bound_ref(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Floor/ceiling lookup of `key` in one chunk snapshot, then [`resolve`].
pub(crate) fn lookup(snapshot: &Snapshot, keyspace: &str, key: &str, timestamp: i64) -> Result<ChunkLookup> {
    key::validate(keyspace, key, timestamp)?;
    let store = matrix_name(keyspace);
    let target = encode_ascending(key, timestamp);
    let is_version = |raw: &[u8]| key::user_key_of(raw) == Some(key.as_bytes());

    let floor = snapshot
        .range(&store, Bound::Included(key.as_bytes()), Bound::Included(target.as_slice()))
        .rev()
        .find(|(raw, _)| is_version(raw));
    let upper = key_upper_bound(key);
    let ceiling = snapshot
        .range(&store, Bound::Excluded(target.as_slice()), bound_ref(&upper))
        .find(|(raw, _)| is_version(raw));

    let has_floor = floor.is_some();
    let ceiling_ts = match ceiling {
        Some((raw, _)) => Some(decode_ascending(raw)?.1),
        None => None,
    };
    let result = resolve(keyspace, key, timestamp, floor, ceiling)?;
    Ok(ChunkLookup {
        result,
        has_floor,
        ceiling: ceiling_ts,
    })
}
