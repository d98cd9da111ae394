/// Integration tests for freezer-cli
/// Tests cover: migrate (direct + staged), get, verify, --min, bench, error exits
use migrate::DumpWriter;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn block_value(seq: u64) -> Vec<u8> {
    format!("block {} body ", seq)
        .repeat(4 + (seq % 5) as usize)
        .into_bytes()
}

/// Writes `block.dump` with sentinel 0 plus `1..=n`.
fn write_dump(dir: &Path, n: u64) {
    let mut w = DumpWriter::create(dir, "block").unwrap();
    w.append_seq(0, b"sentinel").unwrap();
    for seq in 1..=n {
        w.append_seq(seq, &block_value(seq)).unwrap();
    }
    w.finish().unwrap();
}

/// Runs the binary with a clean FREEZER_* environment rooted at `root`.
fn run_cli(root: &Path, args: &[&str], extra_env: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_freezer-cli"));
    cmd.args(args)
        .env("FREEZER_SOURCE_DIR", root.join("dump"))
        .env("FREEZER_ARCHIVE_DIR", root.join("ancient"))
        .env("FREEZER_STAGING_DIR", root.join("binaryblock"))
        .env("FREEZER_MAX_SEGMENT_SIZE", "4096")
        .env_remove("FREEZER_MODE")
        .env_remove("FREEZER_CODEC")
        .env_remove("FREEZER_COLLECTIONS");
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    cmd.output().expect("Failed to run freezer-cli")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn setup(n: u64) -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("dump")).unwrap();
    write_dump(&dir.path().join("dump"), n);
    dir
}

#[test]
fn test_migrate_then_get() {
    let dir = setup(500);

    let out = run_cli(dir.path(), &["migrate"], &[]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("block: 500 records [1, 500]"));

    let out = run_cli(dir.path(), &["get", "42"], &[]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains(&format!("seq 42: {} bytes", block_value(42).len())));
    // "block 42" -> 62 6c 6f 63 6b 20 34 32
    assert!(text.contains("62 6c 6f 63 6b 20 34 32"));
}

#[test]
fn test_get_out_of_range_fails() {
    let dir = setup(20);
    assert!(run_cli(dir.path(), &["migrate"], &[]).status.success());

    for seq in ["0", "21"] {
        let out = run_cli(dir.path(), &["get", seq], &[]);
        assert!(!out.status.success());
        assert!(String::from_utf8_lossy(&out.stderr).contains("out of range"));
    }
}

#[test]
fn test_staged_migrate_and_verify() {
    let dir = setup(300);

    let out = run_cli(
        dir.path(),
        &["migrate"],
        &[("FREEZER_MODE", "staged"), ("FREEZER_CODEC", "lz4")],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(!dir.path().join("binaryblock").join("block").exists());

    let out = run_cli(dir.path(), &["verify"], &[("FREEZER_CODEC", "lz4")]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.contains("block: 300 records"));
    assert!(text.contains("OK"));
}

#[test]
fn test_get_and_verify_with_explicit_min() {
    let dir = setup(50);
    assert!(run_cli(dir.path(), &["migrate"], &[]).status.success());
    std::fs::remove_file(dir.path().join("ancient").join("block.cmeta")).unwrap();

    let out = run_cli(dir.path(), &["get", "7"], &[]);
    assert!(!out.status.success());

    let out = run_cli(dir.path(), &["get", "7", "--min", "1"], &[]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains(&format!("seq 7: {} bytes", block_value(7).len())));

    // the same index read from 101 shifts every sequence number by 100
    let out = run_cli(dir.path(), &["get", "107", "--min", "101"], &[]);
    assert!(out.status.success());
    assert!(stdout(&out).contains(&format!("seq 107: {} bytes", block_value(7).len())));

    let out = run_cli(dir.path(), &["verify", "--min", "1"], &[]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.contains("block: 50 records"));
    assert!(text.contains("OK"));
}

#[test]
fn test_codec_mismatch_is_reported() {
    let dir = setup(10);
    assert!(run_cli(dir.path(), &["migrate"], &[]).status.success());

    let out = run_cli(dir.path(), &["get", "1"], &[("FREEZER_CODEC", "lz4")]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("zstd"));
}

#[test]
fn test_bench_reports_windows() {
    let dir = setup(200);
    assert!(run_cli(dir.path(), &["migrate"], &[]).status.success());

    let out = run_cli(
        dir.path(),
        &["bench"],
        &[
            ("FREEZER_BENCH_ITERATIONS", "300"),
            ("FREEZER_BENCH_REPORT_EVERY", "100"),
            ("FREEZER_BENCH_SEED", "1"),
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.contains("window 1: 100 lookups"));
    assert!(text.contains("window 3: 100 lookups"));
    assert!(text.contains("300 lookups over [1, 200]"));
}

#[test]
fn test_missing_source_dir_fails() {
    let dir = tempdir().unwrap();
    let out = run_cli(dir.path(), &["migrate"], &[]);
    assert!(!out.status.success());
}

#[test]
fn test_invalid_config_fails() {
    let dir = setup(5);
    let out = run_cli(dir.path(), &["migrate"], &[("FREEZER_MAX_SEGMENT_SIZE", "0")]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("max segment size"));
}
