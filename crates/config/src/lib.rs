//! # Config - Freezer Settings
//!
//! Immutable configuration values handed to the migration driver and the
//! latency harness at construction time. Nothing here is global: a binary
//! builds one value (usually from the environment) and passes it down.
//!
//! ## Environment variables
//!
//! ```text
//! FREEZER_SOURCE_DIR            source dump directory        (default: "output-directory/database")
//! FREEZER_ARCHIVE_DIR           archive output directory     (default: "ancient")
//! FREEZER_STAGING_DIR           staged-mode scratch dir      (default: "binaryblock")
//! FREEZER_COLLECTIONS           comma-separated names        (default: "block")
//! FREEZER_MAX_SEGMENT_SIZE      segment cap in bytes         (default: 200000000)
//! FREEZER_CODEC                 zstd | lz4 | none            (default: "zstd")
//! FREEZER_MODE                  direct | staged              (default: "direct")
//! FREEZER_PROGRESS_EVERY        write-pass log cadence       (default: 1000)
//! FREEZER_STAGE_PROGRESS_EVERY  staging-pass log cadence     (default: 10000)
//! FREEZER_MAX_OPEN_SEGMENTS     read-handle cache bound      (default: 256, 0 = unbounded)
//! FREEZER_KEEP_STAGING          keep staged files after pack (default: "false"; accepts 1/0, yes/no, on/off)
//!
//! FREEZER_BENCH_COLLECTION      collection to benchmark      (default: "block")
//! FREEZER_BENCH_ITERATIONS      lookups to perform           (default: 1000000)
//! FREEZER_BENCH_MIN             lowest sampled seq           (default: archive metadata)
//! FREEZER_BENCH_MAX             highest sampled seq          (default: archive metadata)
//! FREEZER_BENCH_REPORT_EVERY    lookups per report window    (default: 10000)
//! FREEZER_BENCH_SEED            RNG seed                     (default: random)
//! ```

use anyhow::{bail, Context, Result};
use codec::CodecKind;
use freezer::MAX_SEGMENT_SIZE_LIMIT;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default segment cap: 200 MB.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 200 * 1000 * 1000;
/// Write-pass progress cadence.
pub const DEFAULT_PROGRESS_EVERY: u64 = 1_000;
/// Staging-pass progress cadence.
pub const DEFAULT_STAGE_PROGRESS_EVERY: u64 = 10_000;
pub const DEFAULT_BENCH_ITERATIONS: u64 = 1_000_000;
pub const DEFAULT_REPORT_EVERY: u64 = 10_000;

/// How the migration driver builds an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// One pass: source iterator straight into the archive writer.
    #[default]
    Direct,
    /// Legacy two-phase mode: stage one compressed file per record, then pack.
    Staged,
}

impl FromStr for WriteMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(WriteMode::Direct),
            "staged" => Ok(WriteMode::Staged),
            other => bail!("unknown write mode '{}' (expected direct or staged)", other),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteMode::Direct => "direct",
            WriteMode::Staged => "staged",
        })
    }
}

/// Settings for a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezerConfig {
    pub source_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub collections: Vec<String>,
    pub max_segment_size: u64,
    pub codec: CodecKind,
    pub mode: WriteMode,
    pub progress_every: u64,
    pub stage_progress_every: u64,
    pub max_open_segments: usize,
    pub keep_staging: bool,
}

impl Default for FreezerConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("output-directory/database"),
            archive_dir: PathBuf::from("ancient"),
            staging_dir: PathBuf::from("binaryblock"),
            collections: vec!["block".to_string()],
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            codec: CodecKind::Zstd,
            mode: WriteMode::Direct,
            progress_every: DEFAULT_PROGRESS_EVERY,
            stage_progress_every: DEFAULT_STAGE_PROGRESS_EVERY,
            max_open_segments: freezer::DEFAULT_MAX_OPEN_SEGMENTS,
            keep_staging: false,
        }
    }
}

impl FreezerConfig {
    /// Loads settings from `FREEZER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let cfg = Self {
            source_dir: lookup("FREEZER_SOURCE_DIR").map(PathBuf::from).unwrap_or(d.source_dir),
            archive_dir: lookup("FREEZER_ARCHIVE_DIR").map(PathBuf::from).unwrap_or(d.archive_dir),
            staging_dir: lookup("FREEZER_STAGING_DIR").map(PathBuf::from).unwrap_or(d.staging_dir),
            collections: match lookup("FREEZER_COLLECTIONS") {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => d.collections,
            },
            max_segment_size: parse_or(&lookup, "FREEZER_MAX_SEGMENT_SIZE", d.max_segment_size)?,
            codec: parse_or(&lookup, "FREEZER_CODEC", d.codec)?,
            mode: parse_or(&lookup, "FREEZER_MODE", d.mode)?,
            progress_every: parse_or(&lookup, "FREEZER_PROGRESS_EVERY", d.progress_every)?,
            stage_progress_every: parse_or(
                &lookup,
                "FREEZER_STAGE_PROGRESS_EVERY",
                d.stage_progress_every,
            )?,
            max_open_segments: parse_or(&lookup, "FREEZER_MAX_OPEN_SEGMENTS", d.max_open_segments)?,
            keep_staging: parse_flag(&lookup, "FREEZER_KEEP_STAGING", d.keep_staging)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// - no collections, or a collection name containing a path separator;
    /// - `max_segment_size` outside `1..=4 GiB` (offsets are `u32`);
    /// - a zero progress cadence.
    pub fn validate(&self) -> Result<()> {
        if self.collections.is_empty() {
            bail!("at least one collection must be configured");
        }
        for name in &self.collections {
            if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
                bail!("invalid collection name '{}'", name);
            }
        }
        if self.max_segment_size == 0 || self.max_segment_size > MAX_SEGMENT_SIZE_LIMIT {
            bail!(
                "max segment size {} must be in 1..={}",
                self.max_segment_size,
                MAX_SEGMENT_SIZE_LIMIT
            );
        }
        if self.progress_every == 0 || self.stage_progress_every == 0 {
            bail!("progress cadence must be > 0");
        }
        Ok(())
    }
}

/// Settings for a latency benchmark run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    pub archive_dir: PathBuf,
    pub collection: String,
    pub codec: CodecKind,
    pub iterations: u64,
    /// Lowest sampled sequence number. `None` means "use archive metadata".
    pub min_seq: Option<u64>,
    /// Highest sampled sequence number. `None` means "use archive metadata".
    pub max_seq: Option<u64>,
    pub report_every: u64,
    pub seed: Option<u64>,
    pub max_open_segments: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from("ancient"),
            collection: "block".to_string(),
            codec: CodecKind::Zstd,
            iterations: DEFAULT_BENCH_ITERATIONS,
            min_seq: None,
            max_seq: None,
            report_every: DEFAULT_REPORT_EVERY,
            seed: None,
            max_open_segments: freezer::DEFAULT_MAX_OPEN_SEGMENTS,
        }
    }
}

impl BenchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let cfg = Self {
            archive_dir: lookup("FREEZER_ARCHIVE_DIR").map(PathBuf::from).unwrap_or(d.archive_dir),
            collection: lookup("FREEZER_BENCH_COLLECTION").unwrap_or(d.collection),
            codec: parse_or(&lookup, "FREEZER_CODEC", d.codec)?,
            iterations: parse_or(&lookup, "FREEZER_BENCH_ITERATIONS", d.iterations)?,
            min_seq: parse_opt(&lookup, "FREEZER_BENCH_MIN")?,
            max_seq: parse_opt(&lookup, "FREEZER_BENCH_MAX")?,
            report_every: parse_or(&lookup, "FREEZER_BENCH_REPORT_EVERY", d.report_every)?,
            seed: parse_opt(&lookup, "FREEZER_BENCH_SEED")?,
            max_open_segments: parse_or(&lookup, "FREEZER_MAX_OPEN_SEGMENTS", d.max_open_segments)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.report_every == 0 {
            bail!("report window must be > 0");
        }
        if let (Some(min), Some(max)) = (self.min_seq, self.max_seq) {
            if min > max {
                bail!("benchmark range is empty: min {} > max {}", min, max);
            }
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

/// Boolean switch: `1/true/yes/on` or `0/false/no/off`, case-insensitive.
fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("invalid value '{}' for {} (expected true/false, 1/0, yes/no, on/off)", raw, key),
    }
}

fn parse_opt<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("invalid value '{}' for {}", raw, key)),
        None => Ok(None),
    }
}
