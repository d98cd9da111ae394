use anyhow::{Context, Result};
use codec::Codec;
use config::{FreezerConfig, WriteMode};
use freezer::{meta_path, ArchiveMeta, FreezerError, FreezerWriter, WriteSummary};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::source::OrderedSource;
use crate::staging;

/// Reserved sequence number the source uses as a non-record marker.
pub const SENTINEL_SEQ: u64 = 0;

/// Width of the big-endian sequence-number prefix of a source key.
pub const SEQ_PREFIX_BYTES: usize = 8;

/// Decodes the sequence number from the leading 8 bytes of `key`.
///
/// Bytes after the prefix (a hash suffix, for example) are ignored.
pub fn sequence_from_key(key: &[u8]) -> freezer::Result<u64> {
    let prefix: [u8; SEQ_PREFIX_BYTES] = key
        .get(..SEQ_PREFIX_BYTES)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| {
            FreezerError::Format(format!(
                "source key of {} bytes is shorter than the {}-byte sequence prefix",
                key.len(),
                SEQ_PREFIX_BYTES
            ))
        })?;
    Ok(u64::from_be_bytes(prefix))
}

/// Outcome of migrating one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSummary {
    pub collection: String,
    pub mode: WriteMode,
    pub write: WriteSummary,
    /// Source entries skipped because their sequence number was the sentinel.
    pub skipped_sentinels: u64,
    /// Files produced by the staging pass (0 in direct mode).
    pub staged_files: u64,
    /// Whether a `.cmeta` sidecar was written.
    pub meta_written: bool,
    pub elapsed: Duration,
}

impl MigrationSummary {
    pub fn min_seq(&self) -> Option<u64> {
        self.write.min_seq
    }

    pub fn max_seq(&self) -> Option<u64> {
        self.write.max_seq
    }
}

/// Moves collections out of an ordered source into freezer archives.
///
/// The driver owns the archive and staging directories: it creates them,
/// overwrites any previous archive of the same collection, and removes the
/// staging tree after a successful pack. Settings are fixed at construction.
pub struct MigrationDriver<S: OrderedSource> {
    config: FreezerConfig,
    source: S,
    codec: Box<dyn Codec>,
}

impl<S: OrderedSource> std::fmt::Debug for MigrationDriver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationDriver")
            .field("config", &self.config)
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl<S: OrderedSource> MigrationDriver<S> {
    /// Validates `config` and builds its codec.
    pub fn new(config: FreezerConfig, source: S) -> Result<Self> {
        config.validate().context("invalid freezer configuration")?;
        let codec = config.codec.build();
        Ok(Self {
            config,
            source,
            codec,
        })
    }

    pub fn config(&self) -> &FreezerConfig {
        &self.config
    }

    /// Migrates every configured collection in order. The first failure
    /// aborts the run.
    pub fn run(&self) -> Result<Vec<MigrationSummary>> {
        fs::create_dir_all(&self.config.archive_dir).with_context(|| {
            format!(
                "creating archive dir {}",
                self.config.archive_dir.display()
            )
        })?;

        let mut summaries = Vec::with_capacity(self.config.collections.len());
        for collection in &self.config.collections {
            let summary = self
                .migrate_collection(collection)
                .with_context(|| format!("migrating collection '{}'", collection))?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// Migrates one collection using the configured [`WriteMode`], then
    /// records the archive metadata.
    pub fn migrate_collection(&self, collection: &str) -> Result<MigrationSummary> {
        let started = Instant::now();
        info!(
            "migrating '{}' ({} mode, codec {}, segment cap {} bytes) into {}",
            collection,
            self.config.mode,
            self.codec.name(),
            self.config.max_segment_size,
            self.config.archive_dir.display()
        );

        // The sidecar only comes back once this pass succeeds.
        self.remove_meta(collection)?;
        let mut writer = FreezerWriter::create(
            &self.config.archive_dir,
            collection,
            self.config.max_segment_size,
            &*self.codec,
        )?;

        let (skipped_sentinels, staged_files) = match self.config.mode {
            WriteMode::Direct => (self.write_direct(collection, &mut writer)?, 0),
            WriteMode::Staged => self.write_staged(collection, &mut writer)?,
        };
        let write = writer.finish()?;

        let meta_written = self.write_meta(collection, &write)?;
        match (write.min_seq, write.max_seq) {
            (Some(min), Some(max)) => info!(
                "'{}' archived: min {} max {} ({} records, {} segment(s))",
                collection, min, max, write.records, write.segments
            ),
            _ => warn!("'{}' had no records to archive", collection),
        }

        Ok(MigrationSummary {
            collection: collection.to_string(),
            mode: self.config.mode,
            write,
            skipped_sentinels,
            staged_files,
            meta_written,
            elapsed: started.elapsed(),
        })
    }

    /// Single pass: source straight into the writer.
    fn write_direct<C: Codec>(
        &self,
        collection: &str,
        writer: &mut FreezerWriter<C>,
    ) -> Result<u64> {
        let mut skipped = 0;
        for item in self
            .source
            .scan(collection)
            .with_context(|| format!("scanning '{}'", collection))?
        {
            let (key, value) = item?;
            let seq = sequence_from_key(&key)?;
            if seq == SENTINEL_SEQ {
                skipped += 1;
                continue;
            }
            writer.append(seq, &value)?;
            if writer.records() % self.config.progress_every == 0 {
                info!("archived {} records of '{}' (seq {})", writer.records(), collection, seq);
            }
        }
        Ok(skipped)
    }

    /// Legacy path: stage per-record files, pack them, drop the staging tree.
    fn write_staged<C: Codec>(
        &self,
        collection: &str,
        writer: &mut FreezerWriter<C>,
    ) -> Result<(u64, u64)> {
        let root = self.staging_root(collection);
        let staged = staging::stage(
            &self.source,
            collection,
            &root,
            &*self.codec,
            self.config.stage_progress_every,
        )?;
        staging::pack(&root, &staged, writer, self.config.progress_every)?;

        if !self.config.keep_staging {
            fs::remove_dir_all(&root)
                .with_context(|| format!("removing staging dir {}", root.display()))?;
        }
        Ok((staged.skipped_sentinels, staged.files))
    }

    /// Staging tree of one collection: `<staging_dir>/<collection>`.
    pub fn staging_root(&self, collection: &str) -> PathBuf {
        self.config.staging_dir.join(collection)
    }

    /// Writes the `.cmeta` sidecar. An empty pass has no range and leaves
    /// none behind.
    fn write_meta(&self, collection: &str, write: &WriteSummary) -> Result<bool> {
        let path = meta_path(&self.config.archive_dir, collection);
        match ArchiveMeta::from_summary(write, self.codec.name(), self.config.max_segment_size) {
            Some(meta) => {
                meta.save(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_meta(&self, collection: &str) -> Result<()> {
        let path = meta_path(&self.config.archive_dir, collection);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("removed previous sidecar {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}
