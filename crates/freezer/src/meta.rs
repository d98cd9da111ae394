/// # Archive metadata sidecar
///
/// The index file carries no header, so the sequence-number range has to
/// come from somewhere else. After a successful pass the migration driver
/// records it in `<collection>.cmeta` next to the archive:
///
/// ```text
/// # freezer archive metadata
/// min_seq=1
/// max_seq=65536
/// records=65536
/// segments=3
/// codec=zstd
/// max_segment_size=200000000
/// ```
///
/// Lines starting with `#` are comments. Empty lines are ignored. Readers
/// may ignore the sidecar entirely and pass `min_seq` themselves.
///
/// The file is rewritten atomically: write `.tmp`, fsync, rename.
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{FreezerError, Result};
use crate::writer::WriteSummary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMeta {
    pub min_seq: u64,
    pub max_seq: u64,
    pub records: u64,
    pub segments: u32,
    /// Codec name as reported by [`codec::Codec::name`].
    pub codec: String,
    pub max_segment_size: u64,
}

impl ArchiveMeta {
    /// Builds metadata from a finished write pass. Returns `None` for an
    /// empty pass, which has no range to record.
    #[must_use]
    pub fn from_summary(summary: &WriteSummary, codec: &str, max_segment_size: u64) -> Option<Self> {
        Some(Self {
            min_seq: summary.min_seq?,
            max_seq: summary.max_seq?,
            records: summary.records,
            segments: summary.segments,
            codec: codec.to_string(),
            max_segment_size,
        })
    }

    /// Parses a sidecar file.
    ///
    /// # Errors
    ///
    /// Returns [`FreezerError::Format`] on unknown keys, unparsable numbers, a
    /// missing key, or `min_seq > max_seq`.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);

        let mut min_seq = None;
        let mut max_seq = None;
        let mut records = None;
        let mut segments = None;
        let mut codec = None;
        let mut max_segment_size = None;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (key, value) = trimmed.split_once('=').ok_or_else(|| {
                FreezerError::Format(format!(
                    "{} line {}: expected 'key=value', got '{}'",
                    path.display(),
                    line_num + 1,
                    trimmed
                ))
            })?;
            let value = value.trim();
            let number = |v: &str| {
                v.parse::<u64>().map_err(|e| {
                    FreezerError::Format(format!(
                        "{} line {}: invalid number '{}': {}",
                        path.display(),
                        line_num + 1,
                        v,
                        e
                    ))
                })
            };

            match key.trim() {
                "min_seq" => min_seq = Some(number(value)?),
                "max_seq" => max_seq = Some(number(value)?),
                "records" => records = Some(number(value)?),
                "segments" => {
                    let n = number(value)?;
                    segments = Some(u32::try_from(n).map_err(|_| {
                        FreezerError::Format(format!("segment count {} out of range", n))
                    })?);
                }
                "codec" => codec = Some(value.to_string()),
                "max_segment_size" => max_segment_size = Some(number(value)?),
                other => {
                    return Err(FreezerError::Format(format!(
                        "{} line {}: unknown key '{}'",
                        path.display(),
                        line_num + 1,
                        other
                    )))
                }
            }
        }

        let missing = |key: &str| FreezerError::Format(format!("{}: missing '{}'", path.display(), key));
        let meta = Self {
            min_seq: min_seq.ok_or_else(|| missing("min_seq"))?,
            max_seq: max_seq.ok_or_else(|| missing("max_seq"))?,
            records: records.ok_or_else(|| missing("records"))?,
            segments: segments.ok_or_else(|| missing("segments"))?,
            codec: codec.ok_or_else(|| missing("codec"))?,
            max_segment_size: max_segment_size.ok_or_else(|| missing("max_segment_size"))?,
        };
        if meta.min_seq > meta.max_seq {
            return Err(FreezerError::Format(format!(
                "{}: min_seq {} > max_seq {}",
                path.display(),
                meta.min_seq,
                meta.max_seq
            )));
        }
        Ok(meta)
    }

    /// Atomically writes the sidecar to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("cmeta.tmp");
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            writeln!(f, "# freezer archive metadata")?;
            writeln!(f, "min_seq={}", self.min_seq)?;
            writeln!(f, "max_seq={}", self.max_seq)?;
            writeln!(f, "records={}", self.records)?;
            writeln!(f, "segments={}", self.segments)?;
            writeln!(f, "codec={}", self.codec)?;
            writeln!(f, "max_segment_size={}", self.max_segment_size)?;
            f.flush()?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
