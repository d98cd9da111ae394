use codec::Codec;
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{FreezerError, Result};
use crate::format::{index_path, is_segment_of, IndexEntry, MAX_SEGMENT_SIZE_LIMIT};
use crate::pool::SegmentPool;

/// Outcome of a completed write pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteSummary {
    /// First sequence number written, `None` if the pass was empty.
    pub min_seq: Option<u64>,
    /// Last sequence number written.
    pub max_seq: Option<u64>,
    /// Number of records (and index entries) written.
    pub records: u64,
    /// Number of segment files produced.
    pub segments: u32,
    /// Total compressed bytes across all segments.
    pub bytes_written: u64,
}

/// Builds a freezer archive in a single sequential pass.
///
/// Each appended record is compressed, written to the current segment, and
/// described by one 6-byte index entry. When the next record would push a
/// non-empty segment past `max_segment_size`, the segment is sealed and the
/// record starts at offset 0 of a fresh one.
///
/// # Contiguity
///
/// The index is positional, so the writer insists on a gap-free domain: the
/// first sequence number fixes `min`, and every later one must be exactly
/// `previous + 1`. Anything else fails with [`FreezerError::SequenceGap`].
///
/// # Crash behaviour
///
/// Sealed segments and their index entries are always consistent. The
/// active segment and the index tail may disagree after a crash; the only
/// recovery is to rerun the pass, and [`create`](FreezerWriter::create)
/// removes leftovers of a previous run for that reason.
pub struct FreezerWriter<C: Codec> {
    dir: PathBuf,
    collection: String,
    codec: C,
    max_segment_size: u64,
    pool: SegmentPool,
    index: Option<BufWriter<File>>,
    segment_id: u16,
    /// Running byte count of the active segment.
    segment_size: u64,
    segment_records: u64,
    min_seq: Option<u64>,
    max_seq: Option<u64>,
    records: u64,
    bytes_written: u64,
    closed: bool,
}

impl<C: Codec> std::fmt::Debug for FreezerWriter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreezerWriter")
            .field("dir", &self.dir)
            .field("collection", &self.collection)
            .field("codec", &self.codec.name())
            .field("max_segment_size", &self.max_segment_size)
            .field("segment_id", &self.segment_id)
            .field("segment_size", &self.segment_size)
            .field("records", &self.records)
            .finish()
    }
}

impl<C: Codec> FreezerWriter<C> {
    /// Creates `<dir>/<collection>.cidx` (truncating any previous index) and
    /// deletes stale `<collection>.NNNN.cdat` segments from an earlier run.
    ///
    /// # Errors
    ///
    /// Returns [`FreezerError::Capacity`] if `max_segment_size` is 0 or larger
    /// than 4 GiB, or an I/O error if the directory or index cannot be created.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        collection: &str,
        max_segment_size: u64,
        codec: C,
    ) -> Result<Self> {
        if max_segment_size == 0 || max_segment_size > MAX_SEGMENT_SIZE_LIMIT {
            return Err(FreezerError::Capacity(format!(
                "max segment size {} must be in 1..={}",
                max_segment_size, MAX_SEGMENT_SIZE_LIMIT
            )));
        }

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let stale = remove_stale_segments(&dir, collection)?;
        if stale > 0 {
            info!(
                "removed {} stale segment(s) of '{}' in {}",
                stale,
                collection,
                dir.display()
            );
        }

        let index_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(index_path(&dir, collection))?;

        Ok(Self {
            pool: SegmentPool::new(&dir, collection, 0),
            dir,
            collection: collection.to_string(),
            codec,
            max_segment_size,
            index: Some(BufWriter::new(index_file)),
            segment_id: 0,
            segment_size: 0,
            segment_records: 0,
            min_seq: None,
            max_seq: None,
            records: 0,
            bytes_written: 0,
            closed: false,
        })
    }

    /// Compresses `payload` and appends it as record `seq`.
    pub fn append(&mut self, seq: u64, payload: &[u8]) -> Result<()> {
        self.check_sequence(seq)?;
        let compressed = self.codec.compress(payload)?;
        self.write_record(seq, &compressed)
    }

    /// Appends bytes that are already compressed with this writer's codec.
    ///
    /// Used by the staged migration mode, whose intermediate files hold
    /// compressed payloads.
    pub fn append_compressed(&mut self, seq: u64, compressed: &[u8]) -> Result<()> {
        self.check_sequence(seq)?;
        self.write_record(seq, compressed)
    }

    fn check_sequence(&self, seq: u64) -> Result<()> {
        if self.closed {
            return Err(FreezerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "writer already closed",
            )));
        }
        if let Some(last) = self.max_seq {
            let expected = last.checked_add(1).ok_or_else(|| {
                FreezerError::Capacity("sequence number overflow (u64::MAX reached)".into())
            })?;
            if seq != expected {
                return Err(FreezerError::SequenceGap {
                    expected,
                    found: seq,
                });
            }
        }
        Ok(())
    }

    fn write_record(&mut self, seq: u64, compressed: &[u8]) -> Result<()> {
        let len = compressed.len() as u64;

        if self.segment_records > 0 && self.segment_size + len > self.max_segment_size {
            self.rotate()?;
        }

        let offset = u32::try_from(self.segment_size).map_err(|_| {
            FreezerError::Capacity(format!(
                "offset {} in segment {} does not fit in u32",
                self.segment_size, self.segment_id
            ))
        })?;

        let segment = self.pool.acquire_write(self.segment_id)?;
        segment.write_all(compressed)?;

        let index = self.index.as_mut().ok_or_else(|| {
            FreezerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "index already closed",
            ))
        })?;
        IndexEntry::new(self.segment_id, offset).write_to(index)?;

        self.segment_size += len;
        self.segment_records += 1;
        self.records += 1;
        self.bytes_written += len;
        self.min_seq.get_or_insert(seq);
        self.max_seq = Some(seq);
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        let next = self.segment_id.checked_add(1).ok_or_else(|| {
            FreezerError::Capacity(format!(
                "segment id overflow: '{}' already has {} segments",
                self.collection,
                u32::from(u16::MAX) + 1
            ))
        })?;
        self.pool.seal()?;
        debug!(
            "sealed segment {} of '{}' at {} bytes ({} records)",
            self.segment_id, self.collection, self.segment_size, self.segment_records
        );
        self.segment_id = next;
        self.segment_size = 0;
        self.segment_records = 0;
        Ok(())
    }

    /// Seals the active segment and flushes the index.
    ///
    /// Both files are closed even if one of them fails.
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let sealed = self.pool.seal();
        let index = match self.index.take() {
            Some(mut w) => w
                .flush()
                .and_then(|_| w.into_inner().map_err(|e| e.into_error()))
                .and_then(|f| f.sync_all()),
            None => Ok(()),
        };
        sealed?;
        index?;
        Ok(())
    }

    /// Finishes the pass, returning what was written.
    pub fn finish(mut self) -> Result<WriteSummary> {
        self.close()?;
        info!(
            "froze '{}': {} records in {} segment(s), {} bytes",
            self.collection,
            self.records,
            self.segment_count(),
            self.bytes_written
        );
        Ok(self.summary())
    }

    #[must_use]
    pub fn summary(&self) -> WriteSummary {
        WriteSummary {
            min_seq: self.min_seq,
            max_seq: self.max_seq,
            records: self.records,
            segments: self.segment_count(),
            bytes_written: self.bytes_written,
        }
    }

    fn segment_count(&self) -> u32 {
        if self.records == 0 {
            0
        } else {
            u32::from(self.segment_id) + 1
        }
    }

    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    #[must_use]
    pub fn max_segment_size(&self) -> u64 {
        self.max_segment_size
    }

    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Best-effort close on drop.
///
/// A pass that fails midway still leaves every handle flushed and closed.
/// Errors are ignored because `Drop` cannot propagate them.
impl<C: Codec> Drop for FreezerWriter<C> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn remove_stale_segments(dir: &Path, collection: &str) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_segment_of(name, collection) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
