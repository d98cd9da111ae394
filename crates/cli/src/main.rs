///! # CLI - Freezer Tool
///!
///! Migrates collections out of an ordered dump into freezer archives,
///! looks records up, verifies archives, and runs the lookup latency
///! benchmark.
///!
///! ## Commands
///!
///! ```text
///! migrate              Archive every configured collection from FREEZER_SOURCE_DIR
///! get <seq> [--min N]  Print a record's length, location, and hex prefix
///! verify [--min N]     Read every record of every configured collection
///! bench                Random point-lookup latency benchmark
///! ```
///!
///! ## Configuration
///!
///! All settings come from `FREEZER_*` environment variables (see the
///! `config` crate). `RUST_LOG` sets the log level. `get` and `verify` take
///! the archive's lowest sequence number from the `.cmeta` sidecar unless
///! `--min` is given.
///!
///! ## Example
///!
///! ```text
///! $ FREEZER_SOURCE_DIR=dump FREEZER_ARCHIVE_DIR=ancient freezer-cli migrate
///! block: 65536 records [1, 65536] in 3 segment(s), 18790231 bytes
///! $ FREEZER_ARCHIVE_DIR=ancient freezer-cli get 42
///! seq 42: 311 bytes (segment 0, offset 9184, 147 compressed)
///! 0000: f9 02 0a a0 ...
///! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::{BenchConfig, FreezerConfig};
use freezer::{meta_path, verify, ArchiveMeta, FreezerReader};
use harness::LatencyBench;
use log::info;
use migrate::{DumpSource, MigrationDriver};

/// Bytes shown by `get`.
const HEX_PREFIX: usize = 32;

#[derive(Parser)]
#[command(name = "freezer-cli")]
#[command(about = "Build, inspect, and benchmark freezer archives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Archive every configured collection from the dump directory
    Migrate,
    /// Print one record's length, location, and hex prefix
    Get {
        seq: u64,
        /// Collection to read (default: first configured collection)
        #[arg(long)]
        collection: Option<String>,
        /// Lowest sequence number in the archive (default: from the sidecar)
        #[arg(long)]
        min: Option<u64>,
    },
    /// Read and check every record of the configured collections
    Verify {
        /// Verify only this collection
        #[arg(long)]
        collection: Option<String>,
        /// Lowest sequence number in the archive (default: from the sidecar)
        #[arg(long)]
        min: Option<u64>,
    },
    /// Run the random point-lookup latency benchmark
    Bench,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Migrate => run_migrate(),
        Command::Get { seq, collection, min } => run_get(seq, collection, min),
        Command::Verify { collection, min } => run_verify(collection, min),
        Command::Bench => run_bench(),
    }
}

fn run_migrate() -> Result<()> {
    let cfg = FreezerConfig::from_env()?;
    info!(
        "freezer migrate (source={}, archive={}, mode={}, codec={}, cap={})",
        cfg.source_dir.display(),
        cfg.archive_dir.display(),
        cfg.mode,
        cfg.codec,
        cfg.max_segment_size
    );

    let source = DumpSource::open(&cfg.source_dir)
        .with_context(|| format!("opening source {}", cfg.source_dir.display()))?;
    let driver = MigrationDriver::new(cfg, source)?;

    for s in driver.run()? {
        match (s.min_seq(), s.max_seq()) {
            (Some(min), Some(max)) => println!(
                "{}: {} records [{}, {}] in {} segment(s), {} bytes ({:?})",
                s.collection,
                s.write.records,
                min,
                max,
                s.write.segments,
                s.write.bytes_written,
                s.elapsed
            ),
            _ => println!("{}: empty", s.collection),
        }
    }
    Ok(())
}

fn open_reader(
    cfg: &FreezerConfig,
    collection: &str,
    min: Option<u64>,
) -> Result<FreezerReader<Box<dyn codec::Codec>>> {
    let opened = match min {
        Some(min) => FreezerReader::open_with_capacity(
            &cfg.archive_dir,
            collection,
            min,
            cfg.codec.build(),
            cfg.max_open_segments,
        ),
        None => FreezerReader::open_with_meta(
            &cfg.archive_dir,
            collection,
            cfg.codec.build(),
            cfg.max_open_segments,
        ),
    };
    opened.with_context(|| format!("opening archive '{}' in {}", collection, cfg.archive_dir.display()))
}

/// The sidecar if it exists. Without `--min` the reader already required it.
fn load_meta(cfg: &FreezerConfig, collection: &str) -> Result<Option<ArchiveMeta>> {
    let path = meta_path(&cfg.archive_dir, collection);
    if !path.exists() {
        return Ok(None);
    }
    let meta = ArchiveMeta::load(&path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Some(meta))
}

fn pick_collection(cfg: &FreezerConfig, collection: Option<String>) -> Result<String> {
    match collection.or_else(|| cfg.collections.first().cloned()) {
        Some(c) => Ok(c),
        None => bail!("no collection configured"),
    }
}

fn run_get(seq: u64, collection: Option<String>, min: Option<u64>) -> Result<()> {
    let cfg = FreezerConfig::from_env()?;
    let collection = pick_collection(&cfg, collection)?;
    let reader = open_reader(&cfg, &collection, min)?;

    let loc = reader.locate(seq)?;
    let raw = reader.get_raw(seq)?;
    let record = reader.get(seq)?;

    println!(
        "seq {}: {} bytes (segment {}, offset {}, {} compressed)",
        seq,
        record.len(),
        loc.segment_id,
        loc.start,
        raw.len()
    );
    let shown = &record[..record.len().min(HEX_PREFIX)];
    let hex: Vec<String> = shown.iter().map(|b| format!("{:02x}", b)).collect();
    println!("0000: {}", hex.join(" "));
    Ok(())
}

fn run_verify(collection: Option<String>, min: Option<u64>) -> Result<()> {
    let cfg = FreezerConfig::from_env()?;
    let collections = match collection {
        Some(c) => vec![c],
        None => cfg.collections.clone(),
    };

    let mut dirty = 0;
    for collection in &collections {
        let reader = open_reader(&cfg, collection, min)?;
        let meta = load_meta(&cfg, collection)?;
        let report = verify(&reader, meta.as_ref())
            .with_context(|| format!("verifying '{}'", collection))?;

        println!(
            "{}: {} records, {} segment(s), {} compressed / {} payload bytes",
            collection,
            report.records,
            report.segments,
            report.compressed_bytes,
            report.payload_bytes
        );
        if !report.is_clean() {
            println!(
                "{}: segments over the cap: {:?}",
                collection, report.oversized_segments
            );
            dirty += 1;
        }
    }
    if dirty > 0 {
        bail!("{} archive(s) failed verification", dirty);
    }
    println!("OK");
    Ok(())
}

fn run_bench() -> Result<()> {
    let cfg = BenchConfig::from_env()?;
    let bench = LatencyBench::open(&cfg)?;
    let (min, max) = bench.range();
    println!(
        "bench '{}': {} lookups over [{}, {}], report every {}",
        cfg.collection, cfg.iterations, min, max, cfg.report_every
    );

    let report = bench.run_with(|w| println!("{}", w))?;
    println!("{}", report);
    Ok(())
}
