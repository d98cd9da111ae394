//! # Freezer - Immutable Segmented Archive
//!
//! Append-only, compressed flat-file storage for records keyed by a dense
//! sequence number. Built once in a single pass, then read-only.
//!
//! ## File layout
//!
//! ```text
//! <dir>/<collection>.cidx        INDEX: one 6-byte entry per sequence number
//! <dir>/<collection>.0000.cdat   SEGMENT 0: concatenated compressed records
//! <dir>/<collection>.0001.cdat   SEGMENT 1: ...
//! <dir>/<collection>.cmeta       METADATA (optional): min/max, counts, codec
//! ```
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ INDEX (.cidx)                                                 │
//! │                                                               │
//! │ entry(min)   = segment_id (u16 BE) | offset (u32 BE)          │
//! │ entry(min+1) = ...                                            │
//! │                                                               │
//! │ entry(seq) is at byte (seq - min) * 6. No header, no keys.    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ SEGMENT (.NNNN.cdat)                                          │
//! │                                                               │
//! │ compressed(rec a) | compressed(rec a+1) | ...                 │
//! │                                                               │
//! │ No framing. A record's length is the next entry's offset      │
//! │ minus its own, or segment size minus its own if it is the     │
//! │ last record of the segment.                                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A segment is sealed when the next record would push it past the
//! configured cap; that record starts at offset 0 of the next segment. A
//! record larger than the cap gets a segment to itself.
//!
//! ## Components
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | `format`   | 6-byte index entry codec, file naming                 |
//! | `pool`     | Segment write handle + bounded read-handle cache      |
//! | `writer`   | [`FreezerWriter`]: single-pass archive construction   |
//! | `reader`   | [`FreezerReader`]: O(1) point lookups                 |
//! | `meta`     | [`ArchiveMeta`]: `.cmeta` sidecar                     |
//! | `verify`   | [`verify`]: full consistency check                    |

mod error;
mod format;
mod meta;
mod pool;
mod reader;
mod verify;
mod writer;

pub use error::{FreezerError, Result};
pub use format::{
    decode, encode, index_path, meta_path, segment_path, IndexEntry, INDEX_ENTRY_BYTES,
    MAX_SEGMENT_SIZE_LIMIT,
};
pub use meta::ArchiveMeta;
pub use pool::{SegmentHandle, SegmentPool, DEFAULT_MAX_OPEN_SEGMENTS};
pub use reader::{FreezerReader, PhaseTimings, RecordLocation};
pub use verify::{verify, VerifyReport};
pub use writer::{FreezerWriter, WriteSummary};

#[cfg(test)]
mod tests;
