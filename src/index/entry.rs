//! Index entry layout inside an index store.
//!
//! Key: `encoded value ++ encoded primary key ++ lower bound (8 bytes BE)`.
//! Value: upper bound (8 bytes BE), `OPEN_END` while the entry is still valid.
//!
//! Both the value and the primary key encodings are prefix-free, so byte
//! order of entry keys is `(value, primary key, lower bound)` order.

use crate::index::value::{decode_str, encode_str, IndexKind, IndexValue};
use crate::period::Period;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub value: IndexValue,
    pub primary_key: String,
    pub period: Period,
}

/// Shared prefix of every entry for one `(value, primary key)` pair.
pub fn entry_prefix(value: &IndexValue, primary_key: &str) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode_into(&mut out);
    encode_str(primary_key, &mut out);
    out
}

pub fn encode_entry_key(value: &IndexValue, primary_key: &str, lower: i64) -> Vec<u8> {
    let mut out = entry_prefix(value, primary_key);
    out.extend_from_slice(&(lower as u64).to_be_bytes());
    out
}

pub fn encode_upper(upper: i64) -> Vec<u8> {
    (upper as u64).to_be_bytes().to_vec()
}

fn read_i64(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Corrupt("index bound is not 8 bytes"))?;
    i64::try_from(u64::from_be_bytes(raw)).map_err(|_| Error::Corrupt("index bound out of range"))
}

pub fn decode_entry(kind: IndexKind, key: &[u8], value: &[u8]) -> Result<IndexEntry> {
    let (index_value, rest) = IndexValue::decode(kind, key)?;
    let (primary_key, rest) = decode_str(rest)?;
    let lower = read_i64(rest)?;
    let upper = read_i64(value)?;
    let period = Period::new(lower, upper)
        .map_err(|_| Error::CorruptState(format!("index entry for {primary_key} has empty period")))?;
    Ok(IndexEntry {
        value: index_value,
        primary_key,
        period,
    })
}
