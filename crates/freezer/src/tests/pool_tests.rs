use super::helpers::*;
use crate::*;
use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn write_handle_is_reused_for_same_segment() -> Result<()> {
    let dir = tempdir()?;
    let mut pool = SegmentPool::new(dir.path(), COLLECTION, 0);

    pool.acquire_write(0)?.write_all(b"abc")?;
    pool.acquire_write(0)?.write_all(b"def")?;
    assert_eq!(pool.active_segment(), Some(0));
    assert_eq!(pool.seal()?, Some(0));
    assert_eq!(pool.active_segment(), None);

    assert_eq!(std::fs::read(pool.segment_path(0))?, b"abcdef");
    Ok(())
}

#[test]
fn switching_segments_seals_previous() -> Result<()> {
    let dir = tempdir()?;
    let mut pool = SegmentPool::new(dir.path(), COLLECTION, 0);

    pool.acquire_write(0)?.write_all(b"first")?;
    pool.acquire_write(1)?.write_all(b"second")?;

    // Segment 0 is fully on disk before segment 1 is sealed.
    assert_eq!(std::fs::read(pool.segment_path(0))?, b"first");
    assert_eq!(pool.seal()?, Some(1));
    assert_eq!(std::fs::read(pool.segment_path(1))?, b"second");
    assert_eq!(pool.seal()?, None);
    Ok(())
}

#[test]
fn read_handles_are_lazy_and_shared() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(segment_path(dir.path(), COLLECTION, 0), b"0123456789")?;
    let pool = SegmentPool::new(dir.path(), COLLECTION, 0);
    assert_eq!(pool.cached_readers(), 0);

    let a = pool.acquire_read(0)?;
    let b = pool.acquire_read(0)?;
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(pool.cached_readers(), 1);
    assert_eq!(a.id(), 0);
    assert_eq!(a.len(), 10);
    assert_eq!(a.read_at(3, 4)?, b"3456");
    Ok(())
}

#[test]
fn missing_segment_fails_without_caching() {
    let dir = tempdir().unwrap();
    let pool = SegmentPool::new(dir.path(), COLLECTION, 0);
    assert!(matches!(pool.acquire_read(3), Err(FreezerError::Io(_))));
    assert_eq!(pool.cached_readers(), 0);
}

#[test]
fn least_recently_used_handle_is_evicted() -> Result<()> {
    let dir = tempdir()?;
    for id in 0..3u16 {
        std::fs::write(segment_path(dir.path(), COLLECTION, id), [id as u8; 4])?;
    }
    let pool = SegmentPool::new(dir.path(), COLLECTION, 2);

    pool.acquire_read(0)?;
    pool.acquire_read(1)?;
    pool.acquire_read(0)?; // 1 is now least recently used
    pool.acquire_read(2)?;

    assert_eq!(pool.cached_readers(), 2);
    assert!(pool.is_cached(0));
    assert!(!pool.is_cached(1));
    assert!(pool.is_cached(2));
    Ok(())
}

#[test]
fn evicted_handle_stays_valid_for_holder() -> Result<()> {
    let dir = tempdir()?;
    for id in 0..2u16 {
        std::fs::write(segment_path(dir.path(), COLLECTION, id), [id as u8 + 1; 4])?;
    }
    let pool = SegmentPool::new(dir.path(), COLLECTION, 1);

    let held = pool.acquire_read(0)?;
    pool.acquire_read(1)?;
    assert!(!pool.is_cached(0));
    assert_eq!(held.read_at(0, 4)?, vec![1u8; 4]);
    Ok(())
}
