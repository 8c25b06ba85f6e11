use super::*;
use std::io::{Read, Write};
use std::rc::Rc;
use std::sync::Mutex;
use sync_file::{ReadAt, WriteAt};

/// An in-memory backing file, so the engine can be exercised without touching disk. Cloning
/// shares the same underlying bytes, which a couple of tests use to reach in and corrupt them
/// after a [`HeapFile`] has taken ownership of one clone.
#[derive(Default, Clone)]
struct TestFile {
    data: Rc<Mutex<Vec<u8>>>,
}

impl ReadAt for TestFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let lock = self.data.lock().unwrap();
        lock.read_at(buf, offset)
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        let lock = self.data.lock().unwrap();
        lock.read_exact_at(buf, offset)
    }
}

impl WriteAt for TestFile {
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        self.write_all_at(buf, offset)?;
        Ok(buf.len())
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()> {
        let mut lock = self.data.lock().unwrap();
        let offset = offset as usize;
        let new_len = offset + buf.len();
        if new_len > lock.len() {
            lock.resize(new_len, 0);
        }
        lock[offset..new_len].copy_from_slice(buf);
        Ok(())
    }
}

fn fresh() -> HeapFile<TestFile> {
    HeapFile::open_with_file(TestFile::default(), HeapFileOptions::default(), true).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[test]
fn round_trip_identity() {
    let mut heap = fresh();
    let body = pattern(111_111);

    let mut w = heap.get_record_writer(0).unwrap();
    w.write_all(&body).unwrap();
    w.close().unwrap();

    let mut r = heap.get_record_reader(0).unwrap().expect("record exists");
    let mut out = Vec::new();
    r.read_to_end(&mut out).unwrap();
    assert_eq!(out, body);
}

#[test]
fn overwrite_grow_and_shrink() {
    let mut heap = fresh();

    for len in [222_222usize, 111_111, 444_444] {
        let body = pattern(len);
        let mut w = heap.get_record_writer(5).unwrap();
        w.write_all(&body).unwrap();
        w.close().unwrap();

        let mut r = heap.get_record_reader(5).unwrap().unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, body, "mismatch after writing {len} bytes");
    }
}

#[test]
fn deallocated_pages_are_reused() {
    let mut heap = fresh();

    let big = pattern(50_000);
    let mut w = heap.get_record_writer(1).unwrap();
    w.write_all(&big).unwrap();
    w.close().unwrap();

    let small = pattern(10);
    let mut w = heap.get_record_writer(1).unwrap();
    w.write_all(&small).unwrap();
    w.close().unwrap();
    heap.flush().unwrap();

    let len_after_shrink = heap.inner.borrow().directory.next_free_page_address;

    let mut w = heap.get_record_writer(2).unwrap();
    w.write_all(&pattern(20_000)).unwrap();
    w.close().unwrap();
    heap.flush().unwrap();

    let len_after_reuse = heap.inner.borrow().directory.next_free_page_address;
    assert_eq!(
        len_after_shrink, len_after_reuse,
        "writing into freed pages must not extend the allocation frontier"
    );
}

#[test]
fn missing_record_reads_as_none() {
    let mut heap = fresh();
    assert!(heap.get_record_reader(42).unwrap().is_none());
}

#[test]
fn remove_then_rewrite() {
    let mut heap = fresh();

    let mut w = heap.get_record_writer(9).unwrap();
    w.write_all(b"hello").unwrap();
    w.close().unwrap();

    heap.remove_record(9).unwrap();
    assert!(heap.get_record_reader(9).unwrap().is_none());

    let mut w = heap.get_record_writer(9).unwrap();
    w.write_all(b"world!").unwrap();
    w.close().unwrap();

    let mut r = heap.get_record_reader(9).unwrap().unwrap();
    let mut out = Vec::new();
    r.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"world!");
}

#[test]
fn exclusivity_between_readers_and_writers() {
    let mut heap = fresh();
    let mut w = heap.get_record_writer(3).unwrap();
    w.write_all(b"x").unwrap();

    assert!(matches!(
        heap.get_record_reader(3),
        Err(Error::IllegalState(_))
    ));

    w.close().unwrap();

    let r1 = heap.get_record_reader(3).unwrap().unwrap();
    let r2 = heap.get_record_reader(3).unwrap().unwrap();
    assert!(matches!(
        heap.get_record_writer(3),
        Err(Error::IllegalState(_))
    ));

    drop(r1);
    drop(r2);
    heap.get_record_writer(3).unwrap().close().unwrap();
}

#[test]
fn key_zero_and_negative_one_are_distinct() {
    let mut heap = fresh();

    let mut w = heap.get_record_writer(0).unwrap();
    w.write_all(b"zero").unwrap();
    w.close().unwrap();

    let mut w = heap.get_record_writer(-1).unwrap();
    w.write_all(b"minus-one").unwrap();
    w.close().unwrap();

    let mut out = Vec::new();
    heap.get_record_reader(0).unwrap().unwrap().read_to_end(&mut out).unwrap();
    assert_eq!(out, b"zero");

    out.clear();
    heap.get_record_reader(-1).unwrap().unwrap().read_to_end(&mut out).unwrap();
    assert_eq!(out, b"minus-one");
}

#[test]
fn legacy_version_string_is_accepted() {
    let file = TestFile::default();
    let mut heap =
        HeapFile::open_with_file(file.clone(), HeapFileOptions::default(), true).unwrap();
    let mut w = heap.get_record_writer(0).unwrap();
    w.write_all(b"payload").unwrap();
    w.close().unwrap();
    heap.flush().unwrap();
    drop(heap);

    {
        let mut lock = file.data.lock().unwrap();
        let legacy = open::LEGACY_VERSION;
        let mut rewritten = Vec::new();
        rewritten.extend_from_slice(&(legacy.len() as u16).to_be_bytes());
        rewritten.extend_from_slice(legacy.as_bytes());

        let current_len = 2 + open::CURRENT_VERSION.len();
        rewritten.extend_from_slice(&lock[current_len..]);
        *lock = rewritten;
    }

    let mut heap = HeapFile::open_with_file(file, HeapFileOptions::default(), false).unwrap();
    let mut out = Vec::new();
    heap.get_record_reader(0)
        .unwrap()
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, b"payload");
}

#[test]
fn corrupted_magic_word_is_detected() {
    let file = TestFile::default();
    let mut heap =
        HeapFile::open_with_file(file.clone(), HeapFileOptions::default(), true).unwrap();

    let mut w = heap.get_record_writer(0).unwrap();
    w.write_all(b"data").unwrap();
    w.close().unwrap();

    let start = heap
        .inner
        .borrow()
        .directory
        .get(remap_key(0))
        .unwrap()
        .start_page_address;

    {
        let mut lock = file.data.lock().unwrap();
        // The magic word occupies the second 8 bytes of the page prefix.
        let magic_offset = start as usize + 8;
        lock[magic_offset] ^= 0xFF;
    }

    let err = heap.get_record_reader(0).unwrap_err();
    assert!(matches!(err, Error::CorruptedPage { .. }));
}

#[test]
fn error_display_is_distinguishable() {
    let errors: Vec<Error> = vec![
        Error::AlreadyLocked { path: "x".into() },
        Error::UnsupportedVersion { found: "bogus".into() },
        Error::CorruptedPage { address: 16 },
        Error::IllegalState("bad state".into()),
        Error::EndOfStream,
    ];
    let mut seen = std::collections::HashSet::new();
    for err in errors {
        let msg = err.to_string();
        assert!(!msg.is_empty());
        assert!(seen.insert(msg));
    }
}

#[test]
fn heap_file_options_defaults_match_spec() {
    let options = HeapFileOptions::default();
    assert_eq!(options.page_data_size, 2048);
    assert!(!options.lock);
    assert!(!options.open_read_only);
}
