use std::io;

use codec::CodecError;
use thiserror::Error;

/// Errors produced by the freezer read and write paths.
///
/// `OutOfRange` and `Corrupt` are per-call failures: the reader's index
/// buffer and cached segment handles are left untouched and later lookups
/// proceed normally. Everything else aborts the enclosing pass.
#[derive(Debug, Error)]
pub enum FreezerError {
    /// A fixed-width record or metadata line could not be parsed.
    #[error("format error: {0}")]
    Format(String),

    /// Filesystem failure. Fatal to the current pass.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The requested sequence number is not covered by the index.
    #[error("sequence number {seq} out of range (min {min}, {records} records)")]
    OutOfRange { seq: u64, min: u64, records: u64 },

    /// The bytes located for `seq` could not be turned back into a record.
    #[error("corrupt archive at sequence number {seq}: {reason}")]
    Corrupt { seq: u64, reason: String },

    /// Compression failed on the write path.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Positional addressing needs a gap-free domain.
    #[error("sequence gap: expected {expected}, got {found}")]
    SequenceGap { expected: u64, found: u64 },

    /// A segment id, offset, or configured cap does not fit the index format.
    #[error("capacity exceeded: {0}")]
    Capacity(String),
}

pub type Result<T> = std::result::Result<T, FreezerError>;
