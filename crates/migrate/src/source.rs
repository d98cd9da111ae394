//! # Ordered sources
//!
//! The migration driver only needs one thing from the live key-value store:
//! every `(key, value)` pair of a collection, in ascending key order. That
//! seam is [`OrderedSource`].
//!
//! Two adapters ship with the crate:
//!
//! - [`MemSource`]: in-memory ordered maps, for tests and small tools.
//! - [`DumpSource`]: a directory of `<collection>.dump` files produced by
//!   [`DumpWriter`] (or an export job of the live store).
//!
//! ## Dump record format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][key_len: u32 LE][key][val_len: u32 LE][value]
//! ```
//!
//! `record_len` covers the CRC and the body but not itself. Unlike a
//! write-ahead log, a dump is a finished export: a truncated tail is an
//! error, not a clean end.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// File extension of a collection dump.
pub const DUMP_EXT: &str = "dump";

// 64 MiB safety cap per record, well above any block payload.
const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// One `(key, value)` pair, or the error that ended the scan.
pub type SourceItem = Result<(Vec<u8>, Vec<u8>), SourceError>;

/// Iterator returned by [`OrderedSource::scan`].
pub type SourceIter<'a> = Box<dyn Iterator<Item = SourceItem> + 'a>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A dump record failed its CRC, is truncated, or has an impossible length.
    #[error("corrupt dump {path} at byte {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Keys did not arrive in ascending order.
    #[error("collection '{collection}' is not ordered: key {key:02x?} follows {prev:02x?}")]
    Unordered {
        collection: String,
        prev: Vec<u8>,
        key: Vec<u8>,
    },

    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
}

/// A store that can enumerate a collection in ascending key order.
pub trait OrderedSource {
    /// Starts a scan over `collection`. Items come out in ascending key order;
    /// the first `Err` ends the scan.
    fn scan(&self, collection: &str) -> Result<SourceIter<'_>, SourceError>;
}

impl<S: OrderedSource + ?Sized> OrderedSource for &S {
    fn scan(&self, collection: &str) -> Result<SourceIter<'_>, SourceError> {
        (**self).scan(collection)
    }
}

// -------------------- MemSource --------------------

/// In-memory collections backed by `BTreeMap`s.
#[derive(Debug, Default, Clone)]
pub struct MemSource {
    collections: BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or overwrites) one pair, creating the collection if needed.
    pub fn insert(&mut self, collection: &str, key: Vec<u8>, value: Vec<u8>) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key, value);
    }

    /// Inserts `value` under the 8-byte big-endian key for `seq`.
    pub fn insert_seq(&mut self, collection: &str, seq: u64, value: Vec<u8>) {
        self.insert(collection, seq.to_be_bytes().to_vec(), value);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl OrderedSource for MemSource {
    fn scan(&self, collection: &str) -> Result<SourceIter<'_>, SourceError> {
        let map = self
            .collections
            .get(collection)
            .ok_or_else(|| SourceError::UnknownCollection(collection.to_string()))?;
        Ok(Box::new(map.iter().map(|(k, v)| Ok((k.clone(), v.clone())))))
    }
}

// -------------------- DumpSource --------------------

/// A directory holding one `<collection>.dump` file per collection.
#[derive(Debug, Clone)]
pub struct DumpSource {
    dir: PathBuf,
}

impl DumpSource {
    /// Opens a dump directory. Fails if `dir` is not a directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, SourceError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(SourceError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source directory {} does not exist", dir.display()),
            )));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of `collection`'s dump file.
    pub fn dump_path(&self, collection: &str) -> PathBuf {
        dump_path(&self.dir, collection)
    }
}

/// `<dir>/<collection>.dump`
pub fn dump_path(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{}.{}", collection, DUMP_EXT))
}

impl OrderedSource for DumpSource {
    fn scan(&self, collection: &str) -> Result<SourceIter<'_>, SourceError> {
        let path = self.dump_path(collection);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SourceError::UnknownCollection(collection.to_string()))
            }
            Err(e) => return Err(SourceError::Io(e)),
        };
        Ok(Box::new(DumpIter {
            rdr: BufReader::new(file),
            path,
            collection: collection.to_string(),
            offset: 0,
            prev_key: None,
            done: false,
        }))
    }
}

/// Sequential reader over one dump file. Verifies every CRC and the
/// ascending key order.
struct DumpIter {
    rdr: BufReader<File>,
    path: PathBuf,
    collection: String,
    offset: u64,
    prev_key: Option<Vec<u8>>,
    done: bool,
}

impl DumpIter {
    fn corrupt(&self, reason: impl Into<String>) -> SourceError {
        SourceError::Corrupt {
            path: self.path.clone(),
            offset: self.offset,
            reason: reason.into(),
        }
    }

    fn read_record(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, SourceError> {
        if self.rdr.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let record_len = self.read_or_truncated(|r| r.read_u32::<LittleEndian>())?;
        // CRC + two length prefixes at minimum
        if record_len < 12 || record_len > MAX_RECORD_SIZE {
            return Err(self.corrupt(format!("record length {}", record_len)));
        }

        let crc = self.read_or_truncated(|r| r.read_u32::<LittleEndian>())?;
        let mut body = vec![0u8; (record_len - 4) as usize];
        self.read_or_truncated(|r| r.read_exact(&mut body))?;

        let mut hasher = Crc32::new();
        hasher.update(&body);
        if hasher.finalize() != crc {
            return Err(self.corrupt("crc mismatch"));
        }

        let mut br = &body[..];
        let key_len = br.read_u32::<LittleEndian>()? as usize;
        if key_len > br.len() {
            return Err(self.corrupt(format!("key length {} exceeds record", key_len)));
        }
        let (key, mut rest) = br.split_at(key_len);
        let val_len = rest.read_u32::<LittleEndian>()? as usize;
        if val_len != rest.len() {
            return Err(self.corrupt(format!(
                "value length {} but {} bytes remain",
                val_len,
                rest.len()
            )));
        }

        self.offset += 4 + u64::from(record_len);
        Ok(Some((key.to_vec(), rest.to_vec())))
    }

    fn read_or_truncated<T>(
        &mut self,
        f: impl FnOnce(&mut BufReader<File>) -> io::Result<T>,
    ) -> Result<T, SourceError> {
        match f(&mut self.rdr) {
            Ok(v) => Ok(v),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(self.corrupt("truncated record"))
            }
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

impl Iterator for DumpIter {
    type Item = SourceItem;

    fn next(&mut self) -> Option<SourceItem> {
        if self.done {
            return None;
        }
        let item = match self.read_record() {
            Ok(Some((key, value))) => match self.prev_key.replace(key.clone()) {
                Some(prev) if prev >= key => Err(SourceError::Unordered {
                    collection: self.collection.clone(),
                    prev,
                    key,
                }),
                _ => Ok((key, value)),
            },
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => Err(e),
        };
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

// -------------------- DumpWriter --------------------

/// Writes a `<collection>.dump` file. Keys must be appended in strictly
/// ascending order.
pub struct DumpWriter {
    collection: String,
    file: BufWriter<File>,
    buf: Vec<u8>,
    last_key: Option<Vec<u8>>,
    records: u64,
}

impl DumpWriter {
    /// Creates (truncating) `<dir>/<collection>.dump`.
    pub fn create<P: AsRef<Path>>(dir: P, collection: &str) -> Result<Self, SourceError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dump_path(dir.as_ref(), collection))?;
        Ok(Self {
            collection: collection.to_string(),
            file: BufWriter::new(file),
            buf: Vec::with_capacity(256),
            last_key: None,
            records: 0,
        })
    }

    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<(), SourceError> {
        if let Some(prev) = &self.last_key {
            if prev.as_slice() >= key {
                return Err(SourceError::Unordered {
                    collection: self.collection.clone(),
                    prev: prev.clone(),
                    key: key.to_vec(),
                });
            }
        }

        self.buf.clear();
        // header placeholder: record_len + crc
        self.buf.extend_from_slice(&[0u8; 8]);
        self.buf.write_u32::<LittleEndian>(len_u32(key.len())?)?;
        self.buf.extend_from_slice(key);
        self.buf.write_u32::<LittleEndian>(len_u32(value.len())?)?;
        self.buf.extend_from_slice(value);

        let body = &self.buf[8..];
        let record_len = body.len() as u64 + 4;
        if record_len > u64::from(MAX_RECORD_SIZE) {
            return Err(SourceError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "dump record too large",
            )));
        }
        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        self.buf[0..4].copy_from_slice(&(record_len as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());
        self.file.write_all(&self.buf)?;

        self.last_key = Some(key.to_vec());
        self.records += 1;
        Ok(())
    }

    /// Appends `value` under the 8-byte big-endian key for `seq`.
    pub fn append_seq(&mut self, seq: u64, value: &[u8]) -> Result<(), SourceError> {
        self.append(&seq.to_be_bytes(), value)
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flushes and fsyncs the dump.
    pub fn finish(mut self) -> Result<u64, SourceError> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(self.records)
    }
}

fn len_u32(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "field too large"))
}
