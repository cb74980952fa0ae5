//! Chunk log record framing.
//!
//! Every mutation is appended as a 16-byte header followed by its payload.
//! A transaction is a run of put records closed by a commit record;
//! replay applies nothing of a transaction whose commit record is missing.

use crate::{Error, Result};

pub const RECORD_HEADER_SIZE: usize = 16;

pub const OP_PUT: u8 = 1;
pub const OP_COMMIT: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub length: u32,
    pub checksum: u32,
    pub op: u8,
    pub _reserved: [u8; 7],
}

impl RecordHeader {
    pub fn new(op: u8, payload: &[u8]) -> Self {
        Self {
            length: payload.len() as u32,
            checksum: Self::crc32(payload),
            op,
            _reserved: [0u8; 7],
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8] = self.op;
        buf[9..16].copy_from_slice(&self._reserved);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(Error::Corrupt("record header truncated"));
        }
        let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let checksum = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let op = bytes[8];
        let mut _reserved = [0u8; 7];
        _reserved.copy_from_slice(&bytes[9..16]);
        Ok(Self {
            length,
            checksum,
            op,
            _reserved,
        })
    }

    pub fn crc32(payload: &[u8]) -> u32 {
        use crc32fast::Hasher;
        let mut hasher = Hasher::new();
        hasher.update(payload);
        hasher.finalize()
    }

    pub fn validate_crc(&self, payload: &[u8]) -> Result<()> {
        if Self::crc32(payload) == self.checksum {
            Ok(())
        } else {
            Err(Error::Corrupt("crc mismatch"))
        }
    }
}

/// Payload of a put: `[store_len u16][store][key_len u32][key][value]`.
pub fn encode_payload(store: &str, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + store.len() + 4 + key.len() + value.len());
    buf.extend_from_slice(&(store.len() as u16).to_le_bytes());
    buf.extend_from_slice(store.as_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

pub fn decode_payload(payload: &[u8]) -> Result<(&str, &[u8], &[u8])> {
    if payload.len() < 2 {
        return Err(Error::Corrupt("record payload truncated"));
    }
    let store_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let store_end = 2 + store_len;
    if payload.len() < store_end + 4 {
        return Err(Error::Corrupt("record payload truncated"));
    }
    let store = std::str::from_utf8(&payload[2..store_end])
        .map_err(|_| Error::Corrupt("store name is not utf-8"))?;
    let key_len = u32::from_le_bytes([
        payload[store_end],
        payload[store_end + 1],
        payload[store_end + 2],
        payload[store_end + 3],
    ]) as usize;
    let key_start = store_end + 4;
    let key_end = key_start
        .checked_add(key_len)
        .ok_or(Error::Corrupt("record key length overflow"))?;
    if payload.len() < key_end {
        return Err(Error::Corrupt("record key truncated"));
    }
    Ok((store, &payload[key_start..key_end], &payload[key_end..]))
}
