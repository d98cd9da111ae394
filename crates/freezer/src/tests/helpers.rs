use crate::*;
use codec::Codec;
use std::path::Path;

pub const COLLECTION: &str = "block";

/// Deterministic payload of exactly `len` bytes for `seq`.
pub fn payload(seq: u64, len: usize) -> Vec<u8> {
    (0..len).map(|i| (seq as usize * 31 + i * 7) as u8).collect()
}

/// Compressible payload whose content still depends on `seq`.
pub fn text_payload(seq: u64) -> Vec<u8> {
    format!("block #{seq} ").repeat(20 + (seq % 13) as usize).into_bytes()
}

/// Writes `records` (must be contiguous) and returns the summary.
pub fn write_archive<C: Codec>(
    dir: &Path,
    max_segment_size: u64,
    codec: C,
    records: &[(u64, Vec<u8>)],
) -> Result<WriteSummary> {
    let mut w = FreezerWriter::create(dir, COLLECTION, max_segment_size, codec)?;
    for (seq, value) in records {
        w.append(*seq, value)?;
    }
    w.finish()
}

/// Reads every index entry straight from disk.
pub fn read_index(dir: &Path) -> Vec<IndexEntry> {
    std::fs::read(index_path(dir, COLLECTION))
        .unwrap()
        .chunks(INDEX_ENTRY_BYTES)
        .map(|c| IndexEntry::decode(c).unwrap())
        .collect()
}

pub fn segment_len(dir: &Path, id: u16) -> u64 {
    std::fs::metadata(segment_path(dir, COLLECTION, id))
        .unwrap()
        .len()
}
