use codec::Codec;
use log::warn;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FreezerError, Result};
use crate::format::{index_path, meta_path, IndexEntry, INDEX_ENTRY_BYTES};
use crate::meta::ArchiveMeta;
use crate::pool::{SegmentPool, DEFAULT_MAX_OPEN_SEGMENTS};

/// Where a record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub segment_id: u16,
    pub start: u32,
    /// Compressed length when the next index entry is in the same segment.
    /// `None` means the record runs to the end of its segment.
    pub len: Option<u32>,
}

/// Cumulative time spent in each lookup phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Index decode plus read-handle acquisition.
    pub index: Duration,
    pub seek: Duration,
    pub read: Duration,
    pub decompress: Duration,
}

impl PhaseTimings {
    #[must_use]
    pub fn total(&self) -> Duration {
        self.index + self.seek + self.read + self.decompress
    }

    pub fn add(&mut self, other: &PhaseTimings) {
        self.index += other.index;
        self.seek += other.seek;
        self.read += other.read;
        self.decompress += other.decompress;
    }

    pub fn reset(&mut self) {
        *self = PhaseTimings::default();
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Index,
    Seek,
    Read,
    Decompress,
}

/// Optional timer threaded through a lookup.
struct Stopwatch<'a> {
    probe: Option<(&'a quanta::Clock, &'a mut PhaseTimings)>,
}

impl Stopwatch<'_> {
    fn start(&self) -> Option<quanta::Instant> {
        self.probe.as_ref().map(|(clock, _)| clock.now())
    }

    fn stop(&mut self, phase: Phase, started: Option<quanta::Instant>) {
        if let (Some((clock, timings)), Some(started)) = (self.probe.as_mut(), started) {
            let elapsed = clock.now().duration_since(started);
            match phase {
                Phase::Index => timings.index += elapsed,
                Phase::Seek => timings.seek += elapsed,
                Phase::Read => timings.read += elapsed,
                Phase::Decompress => timings.decompress += elapsed,
            }
        }
    }
}

/// Point lookups into a sealed freezer archive.
///
/// On [`open`](FreezerReader::open) the whole index file is loaded into
/// memory. A lookup decodes the entry at `(seq - min) * 6`, derives the
/// record length from the following entry (or from the segment size when the
/// record is the last of its segment), then performs exactly one seek and
/// one read against a cached segment handle before decompressing.
///
/// The reader is `Sync`: lookups take `&self` and may run concurrently.
pub struct FreezerReader<C: Codec> {
    dir: PathBuf,
    collection: String,
    index: Vec<u8>,
    min_seq: u64,
    pool: SegmentPool,
    codec: C,
}

impl<C: Codec> std::fmt::Debug for FreezerReader<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreezerReader")
            .field("dir", &self.dir)
            .field("collection", &self.collection)
            .field("min_seq", &self.min_seq)
            .field("records", &self.len())
            .field("cached_segments", &self.cached_segments())
            .finish()
    }
}

impl<C: Codec> FreezerReader<C> {
    /// Opens `<dir>/<collection>.cidx` with an externally supplied `min_seq`.
    pub fn open<P: AsRef<Path>>(dir: P, collection: &str, min_seq: u64, codec: C) -> Result<Self> {
        Self::open_with_capacity(dir, collection, min_seq, codec, DEFAULT_MAX_OPEN_SEGMENTS)
    }

    /// Like [`open`](FreezerReader::open) with an explicit bound on cached
    /// segment handles (`0` = unbounded).
    ///
    /// A trailing partial entry (left by an interrupted write pass) is
    /// ignored with a warning.
    ///
    /// # Errors
    ///
    /// [`FreezerError::Format`] if `min_seq` plus the entry count does not
    /// fit in a `u64`.
    pub fn open_with_capacity<P: AsRef<Path>>(
        dir: P,
        collection: &str,
        min_seq: u64,
        codec: C,
        max_open_segments: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = index_path(&dir, collection);
        let mut index = fs::read(&path)?;

        let partial = index.len() % INDEX_ENTRY_BYTES;
        if partial != 0 {
            warn!(
                "{}: ignoring {} trailing byte(s) of a partial index entry",
                path.display(),
                partial
            );
            index.truncate(index.len() - partial);
        }

        let entries = (index.len() / INDEX_ENTRY_BYTES) as u64;
        if entries > 0 && min_seq.checked_add(entries - 1).is_none() {
            return Err(FreezerError::Format(format!(
                "{}: {} entries starting at {} overflow the sequence space",
                path.display(),
                entries,
                min_seq
            )));
        }

        Ok(Self {
            pool: SegmentPool::new(&dir, collection, max_open_segments),
            dir,
            collection: collection.to_string(),
            index,
            min_seq,
            codec,
        })
    }

    /// Opens an archive taking `min_seq` from its `<collection>.cmeta` sidecar.
    ///
    /// # Errors
    ///
    /// Fails if the sidecar is missing or malformed, or if it records a
    /// different codec than `codec`.
    pub fn open_with_meta<P: AsRef<Path>>(
        dir: P,
        collection: &str,
        codec: C,
        max_open_segments: usize,
    ) -> Result<Self> {
        let meta = ArchiveMeta::load(&meta_path(dir.as_ref(), collection))?;
        if meta.codec != codec.name() {
            return Err(FreezerError::Format(format!(
                "archive '{}' was written with codec '{}', reader uses '{}'",
                collection,
                meta.codec,
                codec.name()
            )));
        }
        let reader =
            Self::open_with_capacity(dir, collection, meta.min_seq, codec, max_open_segments)?;
        if reader.len() != meta.records {
            warn!(
                "'{}': index holds {} entries but metadata records {}",
                collection,
                reader.len(),
                meta.records
            );
        }
        Ok(reader)
    }

    #[must_use]
    pub fn min_seq(&self) -> u64 {
        self.min_seq
    }

    /// Highest sequence number covered by the index, `None` if it is empty.
    #[must_use]
    pub fn max_seq(&self) -> Option<u64> {
        self.len()
            .checked_sub(1)
            .and_then(|last| self.min_seq.checked_add(last))
    }

    /// Number of index entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        (self.index.len() / INDEX_ENTRY_BYTES) as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Number of segment read handles currently cached.
    #[must_use]
    pub fn cached_segments(&self) -> usize {
        self.pool.cached_readers()
    }

    #[must_use]
    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    /// Decodes the index entry at position `pos` (0-based, relative to `min`).
    pub fn entry_at(&self, pos: u64) -> Result<IndexEntry> {
        let start = usize::try_from(pos)
            .ok()
            .and_then(|p| p.checked_mul(INDEX_ENTRY_BYTES))
            .filter(|s| s + INDEX_ENTRY_BYTES <= self.index.len())
            .ok_or(FreezerError::OutOfRange {
                seq: self.min_seq.saturating_add(pos),
                min: self.min_seq,
                records: self.len(),
            })?;
        IndexEntry::decode(&self.index[start..start + INDEX_ENTRY_BYTES])
    }

    /// Finds the segment, start offset and (if derivable) length of `seq`.
    ///
    /// # Errors
    ///
    /// [`FreezerError::OutOfRange`] if `seq < min` or past the last entry;
    /// [`FreezerError::Corrupt`] if offsets within a segment go backwards.
    pub fn locate(&self, seq: u64) -> Result<RecordLocation> {
        let out_of_range = || FreezerError::OutOfRange {
            seq,
            min: self.min_seq,
            records: self.len(),
        };
        let pos = seq.checked_sub(self.min_seq).ok_or_else(out_of_range)?;
        if pos >= self.len() {
            return Err(out_of_range());
        }

        let cur = self.entry_at(pos)?;
        let len = if pos + 1 < self.len() {
            let next = self.entry_at(pos + 1)?;
            if next.segment_id == cur.segment_id {
                let len = next.offset.checked_sub(cur.offset).ok_or_else(|| {
                    FreezerError::Corrupt {
                        seq,
                        reason: format!(
                            "offsets go backwards in segment {} ({} then {})",
                            cur.segment_id, cur.offset, next.offset
                        ),
                    }
                })?;
                Some(len)
            } else {
                None
            }
        } else {
            None
        };

        Ok(RecordLocation {
            segment_id: cur.segment_id,
            start: cur.offset,
            len,
        })
    }

    /// Returns the decompressed record for `seq`.
    pub fn get(&self, seq: u64) -> Result<Vec<u8>> {
        self.lookup(seq, Stopwatch { probe: None })
    }

    /// Like [`get`](FreezerReader::get), adding the time spent in each phase
    /// to `timings`.
    pub fn get_timed(
        &self,
        seq: u64,
        clock: &quanta::Clock,
        timings: &mut PhaseTimings,
    ) -> Result<Vec<u8>> {
        self.lookup(
            seq,
            Stopwatch {
                probe: Some((clock, timings)),
            },
        )
    }

    /// Returns the raw compressed bytes of `seq` without decompressing.
    pub fn get_raw(&self, seq: u64) -> Result<Vec<u8>> {
        let loc = self.locate(seq)?;
        let handle = self.pool.acquire_read(loc.segment_id)?;
        let len = self.record_len(seq, &loc, handle.len())?;
        handle
            .read_at(u64::from(loc.start), len)
            .map_err(|e| read_error(seq, e))
    }

    fn record_len(&self, seq: u64, loc: &RecordLocation, segment_len: u64) -> Result<usize> {
        let start = u64::from(loc.start);
        let len = match loc.len {
            Some(n) => u64::from(n),
            None => segment_len.checked_sub(start).ok_or_else(|| FreezerError::Corrupt {
                seq,
                reason: format!(
                    "offset {} past end of segment {} ({} bytes)",
                    start, loc.segment_id, segment_len
                ),
            })?,
        };
        if start + len > segment_len {
            return Err(FreezerError::Corrupt {
                seq,
                reason: format!(
                    "record [{}, {}) runs past end of segment {} ({} bytes)",
                    start,
                    start + len,
                    loc.segment_id,
                    segment_len
                ),
            });
        }
        usize::try_from(len).map_err(|_| FreezerError::Capacity(format!("record of {} bytes", len)))
    }

    fn lookup(&self, seq: u64, mut watch: Stopwatch<'_>) -> Result<Vec<u8>> {
        let t = watch.start();
        let loc = self.locate(seq)?;
        let handle = self.pool.acquire_read(loc.segment_id)?;
        let len = self.record_len(seq, &loc, handle.len())?;
        watch.stop(Phase::Index, t);

        let raw = {
            let mut f = handle.lock()?;

            let t = watch.start();
            f.seek(SeekFrom::Start(u64::from(loc.start)))?;
            watch.stop(Phase::Seek, t);

            let t = watch.start();
            let mut buf = vec![0u8; len];
            f.read_exact(&mut buf).map_err(|e| read_error(seq, e))?;
            watch.stop(Phase::Read, t);
            buf
        };

        let t = watch.start();
        let record = self
            .codec
            .decompress(&raw)
            .map_err(|e| FreezerError::Corrupt {
                seq,
                reason: e.to_string(),
            })?;
        watch.stop(Phase::Decompress, t);

        Ok(record)
    }
}

fn read_error(seq: u64, e: io::Error) -> FreezerError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FreezerError::Corrupt {
            seq,
            reason: "segment truncated".into(),
        }
    } else {
        FreezerError::Io(e)
    }
}
