use crate::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

fn collect(src: &dyn OrderedSource, collection: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut out = Vec::new();
    for item in src.scan(collection)? {
        out.push(item?);
    }
    Ok(out)
}

// -------------------- MemSource --------------------

#[test]
fn mem_source_scans_in_key_order() -> Result<()> {
    let mut src = MemSource::new();
    src.insert_seq("block", 3, b"c".to_vec());
    src.insert_seq("block", 1, b"a".to_vec());
    src.insert_seq("block", 2, b"b".to_vec());

    let items = collect(&src, "block")?;
    let values: Vec<_> = items.iter().map(|(_, v)| v.as_slice()).collect();
    assert_eq!(values, vec![b"a".as_slice(), b"b", b"c"]);
    assert_eq!(src.len("block"), 3);
    assert!(src.is_empty("trans"));
    Ok(())
}

#[test]
fn mem_source_unknown_collection() {
    let src = MemSource::new();
    assert!(matches!(
        src.scan("block"),
        Err(SourceError::UnknownCollection(name)) if name == "block"
    ));
}

// -------------------- DumpWriter / DumpSource --------------------

#[test]
fn dump_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let mut w = DumpWriter::create(dir.path(), "block")?;
    w.append_seq(1, b"first")?;
    w.append(&[0, 0, 0, 0, 0, 0, 0, 2, 0xaa, 0xbb], b"")?;
    w.append_seq(3, &vec![7u8; 10_000])?;
    assert_eq!(w.finish()?, 3);

    let src = DumpSource::open(dir.path())?;
    let items = collect(&src, "block")?;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0], (1u64.to_be_bytes().to_vec(), b"first".to_vec()));
    assert_eq!(items[1].0.len(), 10);
    assert!(items[1].1.is_empty());
    assert_eq!(items[2].1, vec![7u8; 10_000]);
    Ok(())
}

#[test]
fn dump_writer_rejects_unordered_keys() -> Result<()> {
    let dir = tempdir()?;
    let mut w = DumpWriter::create(dir.path(), "block")?;
    w.append_seq(5, b"x")?;
    assert!(matches!(
        w.append_seq(5, b"y"),
        Err(SourceError::Unordered { .. })
    ));
    assert!(matches!(
        w.append_seq(4, b"y"),
        Err(SourceError::Unordered { .. })
    ));
    Ok(())
}

#[test]
fn dump_source_missing_dir_and_collection() -> Result<()> {
    let dir = tempdir()?;
    assert!(DumpSource::open(dir.path().join("nope")).is_err());

    let src = DumpSource::open(dir.path())?;
    assert!(matches!(
        src.scan("trans"),
        Err(SourceError::UnknownCollection(_))
    ));
    Ok(())
}

#[test]
fn dump_crc_mismatch_is_corrupt() -> Result<()> {
    let dir = tempdir()?;
    let mut w = DumpWriter::create(dir.path(), "block")?;
    w.append_seq(1, b"payload-one")?;
    w.append_seq(2, b"payload-two")?;
    w.finish()?;

    let path = dump_path(dir.path(), "block");
    let mut bytes = fs::read(&path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, bytes)?;

    let src = DumpSource::open(dir.path())?;
    let mut iter = src.scan("block")?;
    assert!(iter.next().unwrap().is_ok());
    assert!(matches!(
        iter.next().unwrap(),
        Err(SourceError::Corrupt { reason, .. }) if reason == "crc mismatch"
    ));
    // the iterator stops after the first error
    assert!(iter.next().is_none());
    Ok(())
}

#[test]
fn dump_truncated_tail_is_an_error() -> Result<()> {
    let dir = tempdir()?;
    let mut w = DumpWriter::create(dir.path(), "block")?;
    w.append_seq(1, b"payload-one")?;
    w.append_seq(2, b"payload-two")?;
    w.finish()?;

    let path = dump_path(dir.path(), "block");
    let bytes = fs::read(&path)?;
    fs::write(&path, &bytes[..bytes.len() - 3])?;

    let src = DumpSource::open(dir.path())?;
    let results: Vec<_> = src.scan("block")?.collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(
        &results[1],
        Err(SourceError::Corrupt { reason, .. }) if reason == "truncated record"
    ));
    Ok(())
}

#[test]
fn dump_source_detects_unordered_file() -> Result<()> {
    let dir = tempdir()?;
    // two independently valid dumps concatenated: keys restart at 1
    let mut w = DumpWriter::create(dir.path(), "a")?;
    w.append_seq(1, b"x")?;
    w.append_seq(2, b"y")?;
    w.finish()?;
    let once = fs::read(dump_path(dir.path(), "a"))?;
    fs::write(dump_path(dir.path(), "block"), [once.clone(), once].concat())?;

    let src = DumpSource::open(dir.path())?;
    let results: Vec<_> = src.scan("block")?.collect();
    assert_eq!(results.len(), 3);
    assert!(matches!(&results[2], Err(SourceError::Unordered { .. })));
    Ok(())
}
