//! Freezer on-disk format: the 6-byte index entry and file naming.
//!
//! ## Index entry (6 bytes, big-endian)
//!
//! ```text
//! [segment_id: u16 BE][offset: u32 BE]
//! ```
//!
//! The entry for sequence number `seq` lives at byte `(seq - min) * 6` of
//! the index file. There is no header, count, or key field.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{FreezerError, Result};

/// Size of one index entry in bytes: 2 (`segment_id`) + 4 (`offset`).
pub const INDEX_ENTRY_BYTES: usize = 2 + 4;

/// Largest permitted segment cap. Offsets are stored as `u32`.
pub const MAX_SEGMENT_SIZE_LIMIT: u64 = u32::MAX as u64 + 1;

pub const INDEX_EXTENSION: &str = "cidx";
pub const SEGMENT_EXTENSION: &str = "cdat";
pub const META_EXTENSION: &str = "cmeta";

/// Location of one record: which segment, and where in it the record starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub segment_id: u16,
    pub offset: u32,
}

impl IndexEntry {
    #[must_use]
    pub fn new(segment_id: u16, offset: u32) -> Self {
        Self { segment_id, offset }
    }

    /// Packs the entry into its fixed 6-byte form.
    #[must_use]
    pub fn encode(&self) -> [u8; INDEX_ENTRY_BYTES] {
        let mut out = [0u8; INDEX_ENTRY_BYTES];
        out[..2].copy_from_slice(&self.segment_id.to_be_bytes());
        out[2..].copy_from_slice(&self.offset.to_be_bytes());
        out
    }

    /// Unpacks an entry.
    ///
    /// # Errors
    ///
    /// Returns [`FreezerError::Format`] if `bytes` is not exactly 6 bytes long.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != INDEX_ENTRY_BYTES {
            return Err(FreezerError::Format(format!(
                "index entry must be {} bytes, got {}",
                INDEX_ENTRY_BYTES,
                bytes.len()
            )));
        }
        let mut r = bytes;
        let segment_id = r.read_u16::<BigEndian>()?;
        let offset = r.read_u32::<BigEndian>()?;
        Ok(Self { segment_id, offset })
    }

    /// Streams the encoded entry into `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<BigEndian>(self.segment_id)?;
        w.write_u32::<BigEndian>(self.offset)
    }
}

/// `encode(segment_id, offset)` as a free function.
#[must_use]
pub fn encode(segment_id: u16, offset: u32) -> [u8; INDEX_ENTRY_BYTES] {
    IndexEntry::new(segment_id, offset).encode()
}

/// `decode(bytes) -> (segment_id, offset)` as a free function.
pub fn decode(bytes: &[u8]) -> Result<(u16, u32)> {
    let e = IndexEntry::decode(bytes)?;
    Ok((e.segment_id, e.offset))
}

/// `<dir>/<collection>.cidx`
#[must_use]
pub fn index_path(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{}.{}", collection, INDEX_EXTENSION))
}

/// `<dir>/<collection>.NNNN.cdat`, segment id zero-padded to four digits.
#[must_use]
pub fn segment_path(dir: &Path, collection: &str, segment_id: u16) -> PathBuf {
    dir.join(format!("{}.{:04}.{}", collection, segment_id, SEGMENT_EXTENSION))
}

/// `<dir>/<collection>.cmeta`
#[must_use]
pub fn meta_path(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{}.{}", collection, META_EXTENSION))
}

/// Returns `true` if `file_name` is a segment file of `collection`.
pub(crate) fn is_segment_of(file_name: &str, collection: &str) -> bool {
    let Some(rest) = file_name
        .strip_prefix(collection)
        .and_then(|r| r.strip_prefix('.'))
    else {
        return false;
    };
    let Some(id) = rest
        .strip_suffix(SEGMENT_EXTENSION)
        .and_then(|r| r.strip_suffix('.'))
    else {
        return false;
    };
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}
