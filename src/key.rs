//! Temporal key encoding.
//!
//! A temporal key is stored as `key bytes ++ 8-byte big-endian timestamp`.
//! The ascending form keeps versions of one key in commit order, which is what
//! floor/ceiling lookups and forward history scans need. The inverted form
//! stores `i64::MAX - timestamp` instead so that a forward scan yields the most
//! recent version first.
//!
//! The timestamp suffix has a fixed width, so the user key is always every byte
//! except the last eight. Neighbouring keys that share a prefix can interleave
//! with each other in byte order; lookups therefore always compare the decoded
//! key before trusting an entry.

use std::fmt;

use crate::{Error, Result};

/// Width of the encoded timestamp suffix.
pub const TIMESTAMP_LEN: usize = 8;

/// `(keyspace, key, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemporalKey {
    pub keyspace: String,
    pub key: String,
    pub timestamp: i64,
}

impl TemporalKey {
    pub fn new(keyspace: impl Into<String>, key: impl Into<String>, timestamp: i64) -> Result<Self> {
        let keyspace = keyspace.into();
        let key = key.into();
        validate(&keyspace, &key, timestamp)?;
        Ok(Self {
            keyspace,
            key,
            timestamp,
        })
    }
}

impl fmt::Display for TemporalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.keyspace, self.key, self.timestamp)
    }
}

/// Fail fast on empty keyspace/key or a negative timestamp.
pub fn validate(keyspace: &str, key: &str, timestamp: i64) -> Result<()> {
    validate_keyspace(keyspace)?;
    if key.is_empty() {
        return Err(Error::precondition("key must not be empty"));
    }
    validate_timestamp(timestamp)
}

pub fn validate_keyspace(keyspace: &str) -> Result<()> {
    if keyspace.is_empty() {
        return Err(Error::precondition("keyspace must not be empty"));
    }
    Ok(())
}

pub fn validate_timestamp(timestamp: i64) -> Result<()> {
    if timestamp < 0 {
        return Err(Error::precondition(format!(
            "timestamp must be >= 0, got {timestamp}"
        )));
    }
    Ok(())
}

/// Name of the store holding the versions of one keyspace.
pub fn matrix_name(keyspace: &str) -> String {
    format!("matrix:{keyspace}")
}

/// Name of the store holding `(timestamp, key)` modification records of one keyspace.
pub fn timeline_name(keyspace: &str) -> String {
    format!("timeline:{keyspace}")
}

/// Store holding one record per commit, newest first.
pub const COMMIT_LOG: &str = "commits";

/// Keyspace names are recovered from matrix store names.
pub fn keyspace_of_matrix(store: &str) -> Option<&str> {
    store.strip_prefix("matrix:")
}

#[inline]
fn timestamp_bytes(timestamp: i64) -> [u8; TIMESTAMP_LEN] {
    (timestamp as u64).to_be_bytes()
}

#[inline]
fn inverted_bytes(timestamp: i64) -> [u8; TIMESTAMP_LEN] {
    ((i64::MAX - timestamp) as u64).to_be_bytes()
}

fn read_suffix(encoded: &[u8]) -> Result<(&[u8], u64)> {
    if encoded.len() < TIMESTAMP_LEN {
        return Err(Error::Corrupt("temporal key shorter than timestamp suffix"));
    }
    let split = encoded.len() - TIMESTAMP_LEN;
    let mut buf = [0u8; TIMESTAMP_LEN];
    buf.copy_from_slice(&encoded[split..]);
    Ok((&encoded[..split], u64::from_be_bytes(buf)))
}

fn key_from_bytes(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Corrupt("temporal key is not utf-8"))
}

/// `key ++ timestamp`, ascending by timestamp within one key.
pub fn encode_ascending(key: &str, timestamp: i64) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(key.len() + TIMESTAMP_LEN);
    encoded.extend_from_slice(key.as_bytes());
    encoded.extend_from_slice(&timestamp_bytes(timestamp));
    encoded
}

pub fn decode_ascending(encoded: &[u8]) -> Result<(String, i64)> {
    let (key, raw) = read_suffix(encoded)?;
    let timestamp = i64::try_from(raw).map_err(|_| Error::Corrupt("timestamp out of range"))?;
    Ok((key_from_bytes(key)?, timestamp))
}

/// `key ++ (i64::MAX - timestamp)`, newest version first within one key.
pub fn encode_inverted(key: &str, timestamp: i64) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(key.len() + TIMESTAMP_LEN);
    encoded.extend_from_slice(key.as_bytes());
    encoded.extend_from_slice(&inverted_bytes(timestamp));
    encoded
}

pub fn decode_inverted(encoded: &[u8]) -> Result<(String, i64)> {
    let (key, raw) = read_suffix(encoded)?;
    let inverted = i64::try_from(raw).map_err(|_| Error::Corrupt("timestamp out of range"))?;
    Ok((key_from_bytes(key)?, i64::MAX - inverted))
}

/// Decoded key without allocating; `None` if the entry is malformed.
pub(crate) fn user_key_of(encoded: &[u8]) -> Option<&[u8]> {
    encoded
        .len()
        .checked_sub(TIMESTAMP_LEN)
        .map(|split| &encoded[..split])
}

/// Timeline records lead with the timestamp so a period is one range scan.
pub fn encode_timeline(timestamp: i64, key: &str) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(TIMESTAMP_LEN + key.len());
    encoded.extend_from_slice(&timestamp_bytes(timestamp));
    encoded.extend_from_slice(key.as_bytes());
    encoded
}

pub fn decode_timeline(encoded: &[u8]) -> Result<(i64, String)> {
    if encoded.len() < TIMESTAMP_LEN {
        return Err(Error::Corrupt("timeline record shorter than timestamp"));
    }
    let mut buf = [0u8; TIMESTAMP_LEN];
    buf.copy_from_slice(&encoded[..TIMESTAMP_LEN]);
    let timestamp =
        i64::try_from(u64::from_be_bytes(buf)).map_err(|_| Error::Corrupt("timestamp out of range"))?;
    Ok((timestamp, key_from_bytes(&encoded[TIMESTAMP_LEN..])?))
}

/// Commit log records: inverted timestamp only.
pub fn encode_commit(timestamp: i64) -> Vec<u8> {
    inverted_bytes(timestamp).to_vec()
}

pub fn decode_commit(encoded: &[u8]) -> Result<i64> {
    let (rest, raw) = read_suffix(encoded)?;
    if !rest.is_empty() {
        return Err(Error::Corrupt("commit record has trailing bytes"));
    }
    let inverted = i64::try_from(raw).map_err(|_| Error::Corrupt("timestamp out of range"))?;
    Ok(i64::MAX - inverted)
}
