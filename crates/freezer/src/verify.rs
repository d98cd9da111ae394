//! Full-archive consistency check.

use codec::Codec;
use log::info;
use std::collections::BTreeMap;

use crate::error::{FreezerError, Result};
use crate::format::INDEX_ENTRY_BYTES;
use crate::meta::ArchiveMeta;
use crate::reader::FreezerReader;

/// Result of [`verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub records: u64,
    pub segments: u32,
    /// Total compressed bytes across all segments.
    pub compressed_bytes: u64,
    /// Total decompressed bytes across all records.
    pub payload_bytes: u64,
    /// Segments holding two or more records that exceed the configured cap.
    pub oversized_segments: Vec<u16>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.oversized_segments.is_empty()
    }
}

struct SegmentStats {
    records: u64,
    last_offset: u32,
}

/// Reads every record in `[min, max]` and checks the archive's structure.
///
/// Checks performed:
/// - segment ids start at 0 and never skip or go backwards;
/// - offsets never decrease within a segment, and every segment file is at
///   least as long as its last offset;
/// - every record decompresses;
/// - with `meta`, the recorded range and record count match the index and
///   multi-record segments stay within `meta.max_segment_size`.
///
/// # Errors
///
/// The first structural violation or unreadable record aborts the check.
pub fn verify<C: Codec>(reader: &FreezerReader<C>, meta: Option<&ArchiveMeta>) -> Result<VerifyReport> {
    let mut report = VerifyReport {
        records: reader.len(),
        ..VerifyReport::default()
    };

    if let Some(meta) = meta {
        if meta.min_seq != reader.min_seq()
            || Some(meta.max_seq) != reader.max_seq()
            || meta.records != reader.len()
        {
            return Err(FreezerError::Format(format!(
                "metadata range [{}, {}] ({} records) disagrees with index ({} entries from {})",
                meta.min_seq,
                meta.max_seq,
                meta.records,
                reader.len(),
                reader.min_seq()
            )));
        }
    }

    // Pass 1: index structure.
    let mut segments: BTreeMap<u16, SegmentStats> = BTreeMap::new();
    let mut prev: Option<(u16, u32)> = None;
    for pos in 0..reader.len() {
        let entry = reader.entry_at(pos)?;
        let seq = reader.min_seq().saturating_add(pos);
        match prev {
            None if entry.segment_id != 0 => {
                return Err(FreezerError::Corrupt {
                    seq,
                    reason: format!("first entry references segment {}", entry.segment_id),
                });
            }
            Some((id, off)) if id == entry.segment_id && entry.offset < off => {
                return Err(FreezerError::Corrupt {
                    seq,
                    reason: format!("offset {} after {} in segment {}", entry.offset, off, id),
                });
            }
            Some((id, _)) if entry.segment_id != id && entry.segment_id != id.wrapping_add(1) => {
                return Err(FreezerError::Corrupt {
                    seq,
                    reason: format!("segment {} follows segment {}", entry.segment_id, id),
                });
            }
            Some((id, _)) if entry.segment_id != id && entry.offset != 0 => {
                return Err(FreezerError::Corrupt {
                    seq,
                    reason: format!(
                        "first record of segment {} starts at {}",
                        entry.segment_id, entry.offset
                    ),
                });
            }
            _ => {}
        }
        let stats = segments.entry(entry.segment_id).or_insert(SegmentStats {
            records: 0,
            last_offset: 0,
        });
        stats.records += 1;
        stats.last_offset = entry.offset;
        prev = Some((entry.segment_id, entry.offset));
    }

    // Pass 2: segment files.
    for (id, stats) in &segments {
        let handle = reader.pool().acquire_read(*id)?;
        if handle.len() < u64::from(stats.last_offset) {
            return Err(FreezerError::Format(format!(
                "segment {} is {} bytes but its last record starts at {}",
                id,
                handle.len(),
                stats.last_offset
            )));
        }
        if let Some(meta) = meta {
            if stats.records >= 2 && handle.len() > meta.max_segment_size {
                report.oversized_segments.push(*id);
            }
        }
        report.compressed_bytes += handle.len();
    }
    report.segments = segments.len() as u32;

    // Pass 3: every record.
    if let Some(max) = reader.max_seq() {
        for seq in reader.min_seq()..=max {
            report.payload_bytes += reader.get(seq)?.len() as u64;
        }
    }

    info!(
        "verified '{}': {} records, {} segment(s), index {} bytes",
        reader.collection(),
        report.records,
        report.segments,
        report.records * INDEX_ENTRY_BYTES as u64
    );
    Ok(report)
}
