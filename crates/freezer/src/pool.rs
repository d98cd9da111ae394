/// Segment file pool: the single write handle and the cached read handles.
///
/// Writing goes through exactly one open segment at a time. Acquiring a
/// different segment for writing seals (flushes, fsyncs, closes) the current
/// one first.
///
/// Reading uses a cache of lazily opened handles keyed by segment id. The
/// cache is bounded by `max_open` with least-recently-used eviction
/// (`0` disables the bound). Each handle guards its file with its own mutex
/// so a seek+read pair from one caller never interleaves with another's.
use log::debug;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::format::segment_path;

/// Default bound on cached read handles.
pub const DEFAULT_MAX_OPEN_SEGMENTS: usize = 256;

/// Write buffer size for the active segment.
const WRITE_BUFFER_BYTES: usize = 1024 * 1024;

/// A cached, read-only segment handle.
#[derive(Debug)]
pub struct SegmentHandle {
    id: u16,
    /// File size captured at open time. Sealed segments never change.
    len: u64,
    file: Mutex<File>,
}

impl SegmentHandle {
    fn open(path: &Path, id: u16) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            id,
            len,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Segment size in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Exclusive access to the underlying file for one seek+read pair.
    pub fn lock(&self) -> io::Result<MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("lock poisoned: {}", e)))
    }

    /// Reads `len` bytes starting at `start`.
    pub fn read_at(&self, start: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut f = self.lock()?;
        f.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; len];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }
}

struct CachedHandle {
    handle: Arc<SegmentHandle>,
    last_used: u64,
}

#[derive(Default)]
struct ReadCache {
    handles: HashMap<u16, CachedHandle>,
    tick: u64,
}

impl ReadCache {
    fn evict_lru(&mut self) {
        let victim = self
            .handles
            .iter()
            .min_by_key(|(_, c)| c.last_used)
            .map(|(id, _)| *id);
        if let Some(id) = victim {
            self.handles.remove(&id);
            debug!("evicted read handle for segment {}", id);
        }
    }
}

struct ActiveSegment {
    id: u16,
    file: BufWriter<File>,
}

/// Owns every file handle of one collection's segments.
pub struct SegmentPool {
    dir: PathBuf,
    collection: String,
    writer: Option<ActiveSegment>,
    readers: Mutex<ReadCache>,
    max_open: usize,
}

impl std::fmt::Debug for SegmentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentPool")
            .field("dir", &self.dir)
            .field("collection", &self.collection)
            .field("active_segment", &self.writer.as_ref().map(|w| w.id))
            .field("max_open", &self.max_open)
            .finish()
    }
}

impl SegmentPool {
    pub fn new<P: AsRef<Path>>(dir: P, collection: &str, max_open: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            collection: collection.to_string(),
            writer: None,
            readers: Mutex::new(ReadCache::default()),
            max_open,
        }
    }

    #[must_use]
    pub fn segment_path(&self, segment_id: u16) -> PathBuf {
        segment_path(&self.dir, &self.collection, segment_id)
    }

    /// Returns the write handle for `segment_id`, creating (and truncating)
    /// the segment file if it is not the one currently open.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing the previous segment or creating the new
    /// one fails.
    pub fn acquire_write(&mut self, segment_id: u16) -> Result<&mut BufWriter<File>> {
        if self.writer.as_ref().map(|w| w.id) != Some(segment_id) {
            self.seal()?;
            let path = self.segment_path(segment_id);
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            debug!("opened segment {} for writing", path.display());
            self.writer = Some(ActiveSegment {
                id: segment_id,
                file: BufWriter::with_capacity(WRITE_BUFFER_BYTES, file),
            });
        }
        let active = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no active segment"))?;
        Ok(&mut active.file)
    }

    /// Flushes, fsyncs, and closes the active write segment, if any.
    ///
    /// Returns the id of the sealed segment.
    pub fn seal(&mut self) -> Result<Option<u16>> {
        let Some(mut active) = self.writer.take() else {
            return Ok(None);
        };
        active.file.flush()?;
        let file = active.file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(Some(active.id))
    }

    /// Id of the segment currently open for writing.
    #[must_use]
    pub fn active_segment(&self) -> Option<u16> {
        self.writer.as_ref().map(|w| w.id)
    }

    /// Returns the cached read handle for `segment_id`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment file cannot be opened.
    pub fn acquire_read(&self, segment_id: u16) -> Result<Arc<SegmentHandle>> {
        let mut cache = self
            .readers
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("lock poisoned: {}", e)))?;
        cache.tick += 1;
        let tick = cache.tick;

        if let Some(cached) = cache.handles.get_mut(&segment_id) {
            cached.last_used = tick;
            return Ok(Arc::clone(&cached.handle));
        }

        let handle = Arc::new(SegmentHandle::open(
            &self.segment_path(segment_id),
            segment_id,
        )?);

        if self.max_open > 0 && cache.handles.len() >= self.max_open {
            cache.evict_lru();
        }
        cache.handles.insert(
            segment_id,
            CachedHandle {
                handle: Arc::clone(&handle),
                last_used: tick,
            },
        );
        Ok(handle)
    }

    /// Number of read handles currently cached.
    #[must_use]
    pub fn cached_readers(&self) -> usize {
        self.readers.lock().map(|c| c.handles.len()).unwrap_or(0)
    }

    /// Returns `true` if a read handle for `segment_id` is cached.
    #[must_use]
    pub fn is_cached(&self, segment_id: u16) -> bool {
        self.readers
            .lock()
            .map(|c| c.handles.contains_key(&segment_id))
            .unwrap_or(false)
    }
}
