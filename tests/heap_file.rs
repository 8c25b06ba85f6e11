//! Disk-backed integration tests: locking, reopening, and the scenarios from the crate's design
//! notes that need a real file on the filesystem.

use pagedheap::{Error, HeapFile, HeapFileOptions};
use std::io::Read;
use std::sync::Once;
use tempfile::tempdir;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

static TRACING: Once = Once::new();

/// Installs a `fmt` subscriber once, so `trace!`/`warn!` output from the crate is visible when a
/// test is run with `--nocapture`.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

#[test]
fn round_trip_across_reopen() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("heap.bin");

    let body = pattern(111_111);
    let mut heap = HeapFile::open(&path)?;
    let mut w = heap.get_record_writer(0)?;
    w.write_all(&body)?;
    w.close()?;
    heap.close()?;
    drop(heap);

    let mut heap = HeapFile::open(&path)?;
    let mut out = Vec::new();
    heap.get_record_reader(0)?
        .expect("record exists")
        .read_to_end(&mut out)?;
    assert_eq!(out, body);
    Ok(())
}

#[test]
fn multiple_overwrites_survive_reopen() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("heap.bin");

    {
        let mut heap = HeapFile::open(&path)?;

        let mut w = heap.get_record_writer(0)?;
        w.write_all(&pattern(111_111))?;
        w.close()?;

        let mut w = heap.get_record_writer(2)?;
        w.write_all(&pattern(222_222))?;
        w.close()?;

        let mut w = heap.get_record_writer(0)?;
        w.write_all(&pattern(333_333))?;
        w.close()?;

        let mut w = heap.get_record_writer(2)?;
        w.write_all(&pattern(444_444))?;
        w.close()?;

        let mut w = heap.get_record_writer(-1)?;
        w.write_all(&pattern(555_555))?;
        w.close()?;

        heap.close()?;
    }

    let mut heap = HeapFile::open(&path)?;
    for (key, len) in [(0, 333_333), (2, 444_444), (-1, 555_555)] {
        let mut out = Vec::new();
        heap.get_record_reader(key)?
            .unwrap_or_else(|| panic!("key {key} missing"))
            .read_to_end(&mut out)?;
        assert_eq!(out, pattern(len), "key {key}");
    }
    Ok(())
}

#[test]
fn small_pages_with_interleaved_removal() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.bin");

    let options = HeapFileOptions {
        page_data_size: 10,
        ..HeapFileOptions::default()
    };
    let mut heap = HeapFile::open_with_options(&path, options).unwrap();

    for (key, len) in [(0, 12), (1, 23), (2, 34), (3, 45)] {
        let mut w = heap.get_record_writer(key).unwrap();
        w.write_all(&pattern(len)).unwrap();
        w.close().unwrap();
    }

    heap.remove_record(1).unwrap();

    let mut w = heap.get_record_writer(4).unwrap();
    w.write_all(&pattern(56)).unwrap();
    w.close().unwrap();

    heap.remove_record(2).unwrap();

    let mut w = heap.get_record_writer(5).unwrap();
    w.write_all(&pattern(1000)).unwrap();
    w.close().unwrap();

    heap.remove_record(3).unwrap();

    let mut out = Vec::new();
    heap.get_record_reader(5)
        .unwrap()
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, pattern(1000));
}

#[test]
fn lock_contention_is_reported() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.bin");

    let options = HeapFileOptions { lock: true, ..HeapFileOptions::default() };
    let _first = HeapFile::open_with_options(&path, options.clone()).unwrap();

    let second = HeapFile::open_with_options(&path, options);
    assert!(matches!(second, Err(Error::AlreadyLocked { .. })));
}

#[test]
fn writer_blocks_reader_until_closed() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.bin");
    let mut heap = HeapFile::open(&path).unwrap();

    let mut w = heap.get_record_writer(7).unwrap();
    w.write_all(b"in progress").unwrap();

    assert!(matches!(heap.get_record_reader(0), Err(Error::IllegalState(_))));

    w.close().unwrap();

    assert!(heap.get_record_reader(0).unwrap().is_none());
    let r = heap.get_record_reader(7).unwrap().unwrap();
    drop(r);
}
