use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::{Error, Result};

/// Read-only mapping of a chunk log used for replay.
pub struct MappedLog {
    _file: File,
    map: Mmap,
    len: usize,
}

impl MappedLog {
    /// Map `path`; `None` if the file is missing or empty (nothing to replay).
    pub fn open(path: &Path) -> Result<Option<Self>> {
        let file = match OpenOptions::new().read(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| Error::Unsupported("chunk log exceeds addressable range"))?;
        if len == 0 {
            return Ok(None);
        }
        let map = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(Some(Self {
            _file: file,
            map,
            len,
        }))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn range(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(Error::Corrupt("range overflow"))?;
        if end > self.len {
            return Err(Error::Corrupt("range out of bounds"));
        }
        Ok(&self.map[offset..end])
    }

    pub fn len(&self) -> usize {
        self.len
    }
}
