//! Indexable scalar values and their order-preserving byte encoding.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const SIGN_BIT: u64 = 1 << 63;
const ESCAPE: u8 = 0xFF;

/// Kind of values held by one secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    String,
    CaseInsensitive,
    Long,
    Double,
}

impl IndexKind {
    fn tag(&self) -> &'static str {
        match self {
            IndexKind::String => "s",
            IndexKind::CaseInsensitive => "ci",
            IndexKind::Long => "l",
            IndexKind::Double => "d",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            IndexKind::String => 0,
            IndexKind::CaseInsensitive => 1,
            IndexKind::Long => 2,
            IndexKind::Double => 3,
        }
    }

    /// Substrate store name for the index `name` of this kind.
    pub fn store_name(&self, name: &str) -> String {
        format!("index:{}:{}", self.tag(), name)
    }
}

/// A value stored in a secondary index.
///
/// Case-insensitive strings are normalized to lower case on construction, so
/// two values that differ only in case compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexValue {
    String(String),
    CaseInsensitive(String),
    Long(i64),
    Double(f64),
}

impl IndexValue {
    pub fn string(value: impl Into<String>) -> Self {
        IndexValue::String(value.into())
    }

    pub fn case_insensitive(value: impl AsRef<str>) -> Self {
        IndexValue::CaseInsensitive(value.as_ref().to_lowercase())
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            IndexValue::String(_) => IndexKind::String,
            IndexValue::CaseInsensitive(_) => IndexKind::CaseInsensitive,
            IndexValue::Long(_) => IndexKind::Long,
            IndexValue::Double(_) => IndexKind::Double,
        }
    }

    /// Order-preserving, prefix-free encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            IndexValue::String(value) => encode_str(value, out),
            IndexValue::CaseInsensitive(value) => encode_str(&value.to_lowercase(), out),
            IndexValue::Long(value) => out.extend_from_slice(&((*value as u64) ^ SIGN_BIT).to_be_bytes()),
            IndexValue::Double(value) => {
                let bits = value.to_bits();
                let ordered = if bits & SIGN_BIT != 0 { !bits } else { bits ^ SIGN_BIT };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
        }
    }

    /// Decode a value of `kind` from the front of `bytes`, returning the rest.
    pub fn decode(kind: IndexKind, bytes: &[u8]) -> Result<(IndexValue, &[u8])> {
        match kind {
            IndexKind::String => {
                let (value, rest) = decode_str(bytes)?;
                Ok((IndexValue::String(value), rest))
            }
            IndexKind::CaseInsensitive => {
                let (value, rest) = decode_str(bytes)?;
                Ok((IndexValue::CaseInsensitive(value), rest))
            }
            IndexKind::Long => {
                let (raw, rest) = split_u64(bytes)?;
                Ok((IndexValue::Long((raw ^ SIGN_BIT) as i64), rest))
            }
            IndexKind::Double => {
                let (raw, rest) = split_u64(bytes)?;
                let bits = if raw & SIGN_BIT != 0 { raw ^ SIGN_BIT } else { !raw };
                Ok((IndexValue::Double(f64::from_bits(bits)), rest))
            }
        }
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Same order as the encoded bytes.
impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexValue::String(a), IndexValue::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (IndexValue::CaseInsensitive(a), IndexValue::CaseInsensitive(b)) => {
                a.to_lowercase().as_bytes().cmp(b.to_lowercase().as_bytes())
            }
            (IndexValue::Long(a), IndexValue::Long(b)) => a.cmp(b),
            (IndexValue::Double(a), IndexValue::Double(b)) => a.total_cmp(b),
            (a, b) => a.kind().rank().cmp(&b.kind().rank()),
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::String(value) | IndexValue::CaseInsensitive(value) => write!(f, "{value}"),
            IndexValue::Long(value) => write!(f, "{value}"),
            IndexValue::Double(value) => write!(f, "{value}"),
        }
    }
}

/// Strings: `0x00` escaped as `0x00 0xFF`, terminated by `0x00 0x00`.
pub(crate) fn encode_str(value: &str, out: &mut Vec<u8>) {
    for &byte in value.as_bytes() {
        out.push(byte);
        if byte == 0 {
            out.push(ESCAPE);
        }
    }
    out.extend_from_slice(&[0, 0]);
}

pub(crate) fn decode_str(bytes: &[u8]) -> Result<(String, &[u8])> {
    let mut raw = Vec::new();
    let mut pos = 0;
    loop {
        let byte = *bytes.get(pos).ok_or(Error::Corrupt("unterminated index string"))?;
        if byte != 0 {
            raw.push(byte);
            pos += 1;
            continue;
        }
        match bytes.get(pos + 1) {
            Some(0) => {
                let value =
                    String::from_utf8(raw).map_err(|_| Error::Corrupt("index string is not utf-8"))?;
                return Ok((value, &bytes[pos + 2..]));
            }
            Some(&ESCAPE) => {
                raw.push(0);
                pos += 2;
            }
            _ => return Err(Error::Corrupt("invalid index string escape")),
        }
    }
}

fn split_u64(bytes: &[u8]) -> Result<(u64, &[u8])> {
    if bytes.len() < 8 {
        return Err(Error::Corrupt("index number shorter than 8 bytes"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    Ok((u64::from_be_bytes(buf), &bytes[8..]))
}

/// Smallest byte string greater than every string starting with `prefix`.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != 0xFF {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}

/// Range of index values a scan is restricted to.
#[derive(Debug, Clone)]
pub struct IndexRange {
    pub start: Bound<IndexValue>,
    pub end: Bound<IndexValue>,
}

impl IndexRange {
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    pub fn exact(value: IndexValue) -> Self {
        Self {
            start: Bound::Included(value.clone()),
            end: Bound::Included(value),
        }
    }

    pub fn between(start: Bound<IndexValue>, end: Bound<IndexValue>) -> Self {
        Self { start, end }
    }

    /// Byte bounds over encoded entry keys.
    pub(crate) fn byte_bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let start = match &self.start {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(value) => Bound::Included(value.encode()),
            Bound::Excluded(value) => match prefix_successor(&value.encode()) {
                Some(next) => Bound::Included(next),
                None => Bound::Excluded(value.encode()),
            },
        };
        let end = match &self.end {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Excluded(value) => Bound::Excluded(value.encode()),
            Bound::Included(value) => match prefix_successor(&value.encode()) {
                Some(next) => Bound::Excluded(next),
                None => Bound::Unbounded,
            },
        };
        (start, end)
    }

    pub fn contains(&self, value: &IndexValue) -> bool {
        let above = match &self.start {
            Bound::Unbounded => true,
            Bound::Included(start) => value >= start,
            Bound::Excluded(start) => value > start,
        };
        let below = match &self.end {
            Bound::Unbounded => true,
            Bound::Included(end) => value <= end,
            Bound::Excluded(end) => value < end,
        };
        above && below
    }
}

impl Default for IndexRange {
    fn default() -> Self {
        Self::all()
    }
}
