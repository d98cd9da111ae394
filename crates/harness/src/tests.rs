use super::*;
use codec::{CodecKind, ZstdCodec};
use freezer::{segment_path, ArchiveMeta, FreezerError, FreezerWriter};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const COLLECTION: &str = "block";

fn payload(seq: u64) -> Vec<u8> {
    format!("block {seq};").repeat(1 + (seq % 9) as usize).into_bytes()
}

/// Archives `min..=max` with zstd and writes the sidecar.
fn build_archive(dir: &Path, min: u64, max: u64) -> Result<()> {
    let mut w = FreezerWriter::create(dir, COLLECTION, 2 * 1024, ZstdCodec::default())?;
    for seq in min..=max {
        w.append(seq, &payload(seq))?;
    }
    let summary = w.finish()?;
    if let Some(meta) = ArchiveMeta::from_summary(&summary, "zstd", 2 * 1024) {
        meta.save(&freezer::meta_path(dir, COLLECTION))?;
    }
    Ok(())
}

fn bench_config(dir: &Path) -> BenchConfig {
    BenchConfig {
        archive_dir: dir.to_path_buf(),
        collection: COLLECTION.to_string(),
        codec: CodecKind::Zstd,
        iterations: 1_000,
        report_every: 100,
        seed: Some(7),
        ..BenchConfig::default()
    }
}

#[test]
fn seeded_run_reports_windows_and_totals() -> Result<()> {
    let dir = tempdir()?;
    build_archive(dir.path(), 1, 500)?;
    let cfg = bench_config(dir.path());

    let bench = LatencyBench::open(&cfg)?;
    assert_eq!(bench.range(), (1, 500));

    let mut seen = Vec::new();
    let report = bench.run_with(|w| seen.push(*w))?;

    assert_eq!(report.lookups, 1_000);
    assert_eq!(report.windows, 10);
    assert_eq!(seen.len(), 10);
    assert!(seen.iter().all(|w| w.lookups == 100));
    assert_eq!(seen.last().map(|w| w.window), Some(10));

    // window counters reset, so the windows sum to the total
    let mut summed = PhaseTimings::default();
    for w in &seen {
        summed.add(&w.phases);
    }
    assert_eq!(summed, report.phases);
    assert!(report.phases.total() > Duration::ZERO);
    assert!(report.p50 <= report.p99 && report.p99 <= report.max);

    // same seed, same samples
    let mut rng = SmallRng::seed_from_u64(7);
    let expected: u64 = (0..1_000)
        .map(|_| payload(rng.gen_range(1..=500)).len() as u64)
        .sum();
    assert_eq!(report.bytes, expected);
    Ok(())
}

#[test]
fn partial_last_window_still_counts() -> Result<()> {
    let dir = tempdir()?;
    build_archive(dir.path(), 1, 50)?;
    let mut cfg = bench_config(dir.path());
    cfg.iterations = 250;

    let mut windows = 0;
    let report = LatencyBench::open(&cfg)?.run_with(|_| windows += 1)?;
    assert_eq!(windows, 2);
    assert_eq!(report.windows, 2);
    assert_eq!(report.lookups, 250);
    Ok(())
}

#[test]
fn explicit_range_is_respected() -> Result<()> {
    let dir = tempdir()?;
    build_archive(dir.path(), 100, 400)?;
    let mut cfg = bench_config(dir.path());
    cfg.min_seq = Some(200);
    cfg.max_seq = Some(200);
    cfg.iterations = 20;

    let report = LatencyBench::open(&cfg)?.run()?;
    assert_eq!((report.min_seq, report.max_seq), (200, 200));
    assert_eq!(report.bytes, 20 * payload(200).len() as u64);
    Ok(())
}

#[test]
fn range_outside_archive_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    build_archive(dir.path(), 100, 400)?;

    let mut cfg = bench_config(dir.path());
    cfg.max_seq = Some(401);
    assert!(LatencyBench::open(&cfg).is_err());

    cfg.max_seq = None;
    cfg.min_seq = Some(99);
    assert!(LatencyBench::open(&cfg).is_err());
    Ok(())
}

#[test]
fn without_sidecar_min_must_be_configured() -> Result<()> {
    let dir = tempdir()?;
    build_archive(dir.path(), 10, 60)?;
    fs::remove_file(freezer::meta_path(dir.path(), COLLECTION))?;

    let mut cfg = bench_config(dir.path());
    assert!(LatencyBench::open(&cfg).is_err());

    cfg.min_seq = Some(10);
    let bench = LatencyBench::open(&cfg)?;
    assert_eq!(bench.range(), (10, 60));
    Ok(())
}

#[test]
fn empty_archive_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    FreezerWriter::create(dir.path(), COLLECTION, 1024, ZstdCodec::default())?.finish()?;
    let reader = FreezerReader::open(dir.path(), COLLECTION, 1, ZstdCodec::default())?;
    assert!(LatencyBench::new(reader, &bench_config(dir.path())).is_err());
    Ok(())
}

#[test]
fn first_failed_lookup_aborts_the_run() -> Result<()> {
    let dir = tempdir()?;
    build_archive(dir.path(), 1, 5)?;
    // every record lives in segment 0; overwrite it with same-length garbage
    let seg = segment_path(dir.path(), COLLECTION, 0);
    let len = fs::metadata(&seg)?.len() as usize;
    fs::write(&seg, vec![0x5a; len])?;

    let err = LatencyBench::open(&bench_config(dir.path()))?
        .run()
        .unwrap_err();
    assert!(err
        .chain()
        .any(|e| matches!(e.downcast_ref::<FreezerError>(), Some(FreezerError::Corrupt { .. }))));
    Ok(())
}

#[test]
fn report_display_mentions_percentiles() -> Result<()> {
    let dir = tempdir()?;
    build_archive(dir.path(), 1, 20)?;
    let mut cfg = bench_config(dir.path());
    cfg.iterations = 10;
    let text = LatencyBench::open(&cfg)?.run()?.to_string();
    assert!(text.contains("10 lookups over [1, 20]"));
    assert!(text.contains("p99"));
    Ok(())
}
