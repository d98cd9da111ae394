//! Legacy two-phase migration: stage every record as its own compressed
//! file, then pack the staged files into an archive.
//!
//! ```text
//! <root>/0000/1.data ... <root>/0000/9999.data
//! <root>/0001/10000.data ...
//! ```
//!
//! Staged files hold the already-compressed bytes, so packing copies them
//! into segments without touching the codec again.

use anyhow::{Context, Result};
use codec::Codec;
use freezer::{FreezerError, FreezerWriter};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::{sequence_from_key, SENTINEL_SEQ};
use crate::source::OrderedSource;

/// Records per staging shard directory.
pub const SHARD_WIDTH: u64 = 10_000;

/// `<root>/NNNN/<seq>.data` with `NNNN = seq / 10000`.
pub fn staged_path(root: &Path, seq: u64) -> PathBuf {
    root.join(format!("{:04}", seq / SHARD_WIDTH))
        .join(format!("{}.data", seq))
}

/// What the staging pass produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub min_seq: Option<u64>,
    pub max_seq: Option<u64>,
    pub files: u64,
    pub skipped_sentinels: u64,
}

/// Compresses every record of `collection` into its own staged file under
/// `root`. A previous staging tree at `root` is removed first.
///
/// Sequence numbers must be contiguous, as in the writer: a repeated or
/// skipped number fails with [`FreezerError::SequenceGap`] before anything
/// is overwritten.
pub fn stage<S, C>(
    source: &S,
    collection: &str,
    root: &Path,
    codec: &C,
    progress_every: u64,
) -> Result<StageSummary>
where
    S: OrderedSource + ?Sized,
    C: Codec + ?Sized,
{
    if root.exists() {
        fs::remove_dir_all(root)
            .with_context(|| format!("removing stale staging dir {}", root.display()))?;
    }
    fs::create_dir_all(root)?;

    let progress_every = progress_every.max(1);
    let mut summary = StageSummary::default();
    let mut shard: Option<u64> = None;

    for item in source
        .scan(collection)
        .with_context(|| format!("scanning '{}'", collection))?
    {
        let (key, value) = item?;
        let seq = sequence_from_key(&key)?;
        if seq == SENTINEL_SEQ {
            summary.skipped_sentinels += 1;
            continue;
        }
        if let Some(prev) = summary.max_seq {
            if prev.checked_add(1) != Some(seq) {
                return Err(FreezerError::SequenceGap {
                    expected: prev.saturating_add(1),
                    found: seq,
                }
                .into());
            }
        }

        if shard != Some(seq / SHARD_WIDTH) {
            let dir = root.join(format!("{:04}", seq / SHARD_WIDTH));
            fs::create_dir_all(&dir)?;
            shard = Some(seq / SHARD_WIDTH);
        }

        let compressed = codec.compress(&value)?;
        let path = staged_path(root, seq);
        fs::write(&path, &compressed)
            .with_context(|| format!("writing staged file {}", path.display()))?;

        summary.min_seq.get_or_insert(seq);
        summary.max_seq = Some(seq);
        summary.files += 1;
        if summary.files % progress_every == 0 {
            info!("staged {} records of '{}' (seq {})", summary.files, collection, seq);
        }
    }

    info!(
        "staging '{}' done: {} files, min {:?}, max {:?}",
        collection, summary.files, summary.min_seq, summary.max_seq
    );
    Ok(summary)
}

/// Appends every staged file in `[min, max]` to `writer`, in order.
///
/// A missing staged file fails the pass with its I/O error, which is how a
/// gap in the staged range surfaces.
pub fn pack<C: Codec>(
    root: &Path,
    staged: &StageSummary,
    writer: &mut FreezerWriter<C>,
    progress_every: u64,
) -> Result<()> {
    let (Some(min), Some(max)) = (staged.min_seq, staged.max_seq) else {
        return Ok(());
    };

    let progress_every = progress_every.max(1);
    for seq in min..=max {
        let path = staged_path(root, seq);
        let bytes =
            fs::read(&path).with_context(|| format!("reading staged file {}", path.display()))?;
        writer.append_compressed(seq, &bytes)?;
        if writer.records() % progress_every == 0 {
            info!("packed {} staged records (seq {})", writer.records(), seq);
        }
    }
    Ok(())
}
