//! # Migrate - Store to Freezer
//!
//! Drives [`freezer::FreezerWriter`] over the collections of an ordered
//! key-value source. Each source key carries its sequence number in its
//! leading 8 bytes (big-endian); the sentinel sequence number 0 is skipped.
//!
//! Two write paths exist:
//!
//! - **direct** (default): one pass, source iterator straight into the writer.
//! - **staged** (legacy): every record is first compressed into its own file
//!   under `<staging_dir>/<collection>/NNNN/<seq>.data`, then a second pass
//!   packs the staged files in sequence order.
//!
//! After a successful pass the driver writes the `<collection>.cmeta`
//! sidecar so readers and the benchmark harness can find the range.

mod driver;
mod source;
pub mod staging;

pub use driver::{
    sequence_from_key, MigrationDriver, MigrationSummary, SENTINEL_SEQ, SEQ_PREFIX_BYTES,
};
pub use source::{
    dump_path, DumpSource, DumpWriter, MemSource, OrderedSource, SourceError, SourceItem,
    SourceIter, DUMP_EXT,
};

#[cfg(test)]
mod tests;
