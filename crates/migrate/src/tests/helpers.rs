use crate::*;
use codec::CodecKind;
use config::{FreezerConfig, WriteMode};
use std::path::Path;

pub const COLLECTION: &str = "block";

pub fn block_payload(seq: u64) -> Vec<u8> {
    format!("header {seq} | txs ").repeat(3 + (seq % 7) as usize).into_bytes()
}

/// Config rooted at `root`, with small cadences so progress logging runs.
pub fn config_in(root: &Path, mode: WriteMode) -> FreezerConfig {
    FreezerConfig {
        source_dir: root.join("db"),
        archive_dir: root.join("ancient"),
        staging_dir: root.join("binaryblock"),
        collections: vec![COLLECTION.to_string()],
        max_segment_size: 4 * 1024,
        codec: CodecKind::Zstd,
        mode,
        progress_every: 10,
        stage_progress_every: 10,
        ..FreezerConfig::default()
    }
}

/// Sentinel key 0 followed by `1..=n`.
pub fn block_source(n: u64) -> MemSource {
    let mut src = MemSource::new();
    src.insert_seq(COLLECTION, SENTINEL_SEQ, b"genesis marker".to_vec());
    for seq in 1..=n {
        src.insert_seq(COLLECTION, seq, block_payload(seq));
    }
    src
}
