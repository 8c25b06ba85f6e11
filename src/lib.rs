//! Reads and writes paged heap files: a single-file, random-access container storing
//! variable-length byte records keyed by a signed 64-bit integer.
//!
//! A heap file is organized as a chain of fixed-size pages. Each record is a linked chain of one
//! or more pages; a free-list of deallocated pages is reused before the file is ever extended. An
//! in-memory directory maps each record's key to its start-page address and byte count, and is
//! itself persisted as a record at the reserved key `0`.
//!
//! Most callers should go through [`HeapFile`]: open or create one with [`HeapFile::open`], then
//! obtain a [`RecordWriter`] or [`RecordReader`] for a given key. At most one writer, or any
//! number of readers, may be live at a time; see the module's design notes for the full
//! exclusivity contract.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod alloc;
mod check;
mod directory;
mod error;
mod open;
mod page;
mod reader;
mod writer;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use open::HeapFileOptions;
pub use reader::RecordReader;
pub use writer::RecordWriter;

use directory::{Directory, INDEX_RECORD_ID};
use page::PAGE_HEADER_LEN;
use std::cell::RefCell;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;
use sync_file::{RandomAccessFile, ReadAt, WriteAt};
use tracing::{trace, trace_span, warn};

/// Specifies the access mode a [`HeapFile`] was opened with.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum AccessMode {
    /// Read-only: mutating operations fail with [`Error::IllegalState`].
    Read,
    /// Read-write.
    ReadWrite,
}

/// Shared state behind a [`HeapFile`] handle, reference-counted so that live
/// [`RecordReader`]/[`RecordWriter`] streams can keep a back-edge to it without borrowing the
/// handle for their own lifetime (see the crate's design notes on self-referential streams).
struct Inner<F> {
    file: F,
    page_data_size: i32,
    /// `page_data_size + PAGE_HEADER_LEN`, cached to avoid recomputing it on every allocation.
    page_size: i64,
    /// Fixed start-page address of the directory record (§3, invariant 6). Never stored in the
    /// directory itself.
    directory_start_page: i64,
    /// Byte offset of the header's allocation fields, used to rewrite them on flush.
    alloc_fields_offset: u64,
    directory: Directory,
    access_mode: AccessMode,
    live_writers: usize,
    live_readers: usize,
    closed: bool,
    safe_mode: bool,
}

/// Maps a caller-visible key to its internal key: non-negative keys are shifted up by one so
/// they never collide with the reserved directory key `0`; negative keys pass through unchanged.
fn remap_key(caller_key: i64) -> i64 {
    if caller_key >= 0 {
        caller_key + 1
    } else {
        caller_key
    }
}

/// A single-file paged heap storing variable-length byte records keyed by a signed 64-bit
/// integer.
///
/// `F` is generic over [`sync_file::ReadAt`] + [`sync_file::WriteAt`] so that tests can exercise
/// the engine against an in-memory file; ordinary callers use the default, [`RandomAccessFile`].
pub struct HeapFile<F = RandomAccessFile> {
    inner: Rc<RefCell<Inner<F>>>,
}

impl HeapFile<RandomAccessFile> {
    /// Opens or creates a heap file at `path` with default options.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_options(path, HeapFileOptions::default())
    }

    /// Opens or creates a heap file at `path` with the given options.
    pub fn open_with_options(path: &Path, options: HeapFileOptions) -> Result<Self> {
        let _span = trace_span!("HeapFile::open_with_options", ?path).entered();

        let std_file = File::options()
            .read(true)
            .write(!options.open_read_only)
            .create(!options.open_read_only)
            .open(path)?;

        if options.lock {
            use fs4::fs_std::FileExt;
            std_file
                .try_lock_exclusive()
                .map_err(|_| Error::AlreadyLocked { path: path.to_path_buf() })?;
        }

        let new_file = std_file.metadata()?.len() == 0;
        let random_file = RandomAccessFile::from(std_file);
        Self::open_with_file(random_file, options, new_file)
    }
}

impl<F: ReadAt + WriteAt> HeapFile<F> {
    /// Opens or creates a heap file on an already-opened backing file.
    ///
    /// `new_file` tells the handle whether `file` is empty (and must be initialized with a fresh
    /// header and empty directory) or already contains a heap file to reopen. Callers using a
    /// real [`std::fs::File`] should prefer [`Self::open`]; this entry point exists for test
    /// harnesses and callers that manage the backing file themselves.
    pub fn open_with_file(file: F, options: HeapFileOptions, new_file: bool) -> Result<Self> {
        let _span = trace_span!("HeapFile::open_with_file", new_file).entered();

        let (page_data_size, directory_start_page, alloc_fields_offset, directory) = if new_file {
            let page_data_size = options.page_data_size;
            let page_size = page_data_size as i64 + PAGE_HEADER_LEN as i64;

            let (header_len, alloc_fields_offset) =
                open::write_new_header(&file, page_data_size)?;
            let directory_start_page = header_len;

            let index_byte_count = open::write_initial_directory(
                &file,
                directory_start_page,
                page_data_size as usize,
            )?;

            let next_free_page_address = directory_start_page + page_size;
            open::rewrite_allocation_fields(
                &file,
                alloc_fields_offset,
                page_data_size,
                index_byte_count,
                next_free_page_address,
                0,
                0,
            )?;

            trace!(directory_start_page, page_data_size, "initialized new heap file");
            let directory = Directory::new(next_free_page_address, 0, 0);
            (page_data_size, directory_start_page, alloc_fields_offset, directory)
        } else {
            let header = open::read_header(&file)?;
            let directory_start_page = header.header_len;

            let bytes = open::read_chain_bytes(
                &file,
                directory_start_page,
                header.page_data_size as usize,
                header.index_byte_count,
            )?;

            let mut directory = Directory::new(
                header.next_free_page_address,
                header.first_deallocated_page,
                header.last_deallocated_page,
            );
            directory
                .load_entries(&bytes)
                .ok_or(Error::CorruptedPage { address: directory_start_page })?;

            trace!(directory_start_page, index_byte_count = header.index_byte_count, "reopened heap file");
            (
                header.page_data_size,
                directory_start_page,
                header.alloc_fields_offset,
                directory,
            )
        };

        let page_size = page_data_size as i64 + PAGE_HEADER_LEN as i64;
        let access_mode = if options.open_read_only {
            AccessMode::Read
        } else {
            AccessMode::ReadWrite
        };

        let inner = Inner {
            file,
            page_data_size,
            page_size,
            directory_start_page,
            alloc_fields_offset,
            directory,
            access_mode,
            live_writers: 0,
            live_readers: 0,
            closed: false,
            safe_mode: false,
        };
        inner.assert_invariants();

        Ok(Self { inner: Rc::new(RefCell::new(inner)) })
    }

    /// Enables or disables the extra consistency assertions described in the crate's design
    /// notes. Has no effect in release builds.
    pub fn set_safe_mode(&mut self, enabled: bool) {
        self.inner.borrow_mut().safe_mode = enabled;
    }

    /// Obtains a writer for `caller_key`, overwriting any existing record at that key once the
    /// writer is closed.
    ///
    /// Fails with [`Error::IllegalState`] if the handle is read-only or if any writer or reader
    /// is currently live.
    pub fn get_record_writer(&mut self, caller_key: i64) -> Result<RecordWriter<F>> {
        let _span = trace_span!("HeapFile::get_record_writer", caller_key).entered();

        let internal_key = {
            let guard = self.inner.borrow();
            if guard.access_mode == AccessMode::Read {
                return Err(Error::IllegalState("handle is read-only".into()));
            }
            if guard.live_writers > 0 {
                return Err(Error::IllegalState("a writer is already live".into()));
            }
            if guard.live_readers > 0 {
                return Err(Error::IllegalState("a reader is live".into()));
            }
            remap_key(caller_key)
        };

        let writer = RecordWriter::new(Rc::clone(&self.inner), internal_key)?;
        self.inner.borrow().assert_invariants();
        Ok(writer)
    }

    /// Obtains a reader for `caller_key`, or `None` if no record exists at that key.
    ///
    /// Fails with [`Error::IllegalState`] if any writer is currently live.
    pub fn get_record_reader(&mut self, caller_key: i64) -> Result<Option<RecordReader<F>>> {
        let _span = trace_span!("HeapFile::get_record_reader", caller_key).entered();

        let internal_key = {
            let guard = self.inner.borrow();
            if guard.live_writers > 0 {
                return Err(Error::IllegalState("a writer is live".into()));
            }
            remap_key(caller_key)
        };

        RecordReader::new(Rc::clone(&self.inner), internal_key)
    }

    /// Removes the record at `caller_key`, if any. A no-op if no such record exists.
    ///
    /// Fails with [`Error::IllegalState`] if the handle is read-only or if any writer or reader
    /// is currently live.
    pub fn remove_record(&mut self, caller_key: i64) -> Result<()> {
        let _span = trace_span!("HeapFile::remove_record", caller_key).entered();

        let mut guard = self.inner.borrow_mut();
        if guard.access_mode == AccessMode::Read {
            return Err(Error::IllegalState("handle is read-only".into()));
        }
        if guard.live_writers > 0 {
            return Err(Error::IllegalState("a writer is live".into()));
        }
        if guard.live_readers > 0 {
            return Err(Error::IllegalState("a reader is live".into()));
        }

        let internal_key = remap_key(caller_key);
        if let Some(entry) = guard.directory.remove(internal_key) {
            let start = entry.start_page_address;
            let (file, directory) = split_file_and_directory(&mut guard);
            alloc::deallocate_chain(directory, file, start)?;
        }

        guard.assert_invariants();
        Ok(())
    }

    /// Rewrites the directory record and the header's allocation fields, if the directory has
    /// been modified since the last flush.
    pub fn flush(&mut self) -> Result<()> {
        let _span = trace_span!("HeapFile::flush").entered();

        if !self.inner.borrow().directory.is_dirty() {
            return Ok(());
        }

        let bytes = self.inner.borrow().directory.serialize();
        let mut writer = RecordWriter::new(Rc::clone(&self.inner), INDEX_RECORD_ID)?;
        writer.write_all(&bytes)?;
        let index_byte_count = writer.close()?;

        let mut guard = self.inner.borrow_mut();
        open::rewrite_allocation_fields(
            &guard.file,
            guard.alloc_fields_offset,
            guard.page_data_size,
            index_byte_count,
            guard.directory.next_free_page_address,
            guard.directory.first_deallocated_page,
            guard.directory.last_deallocated_page,
        )?;
        guard.directory.clear_dirty();
        trace!(index_byte_count, "flushed directory and header");

        Ok(())
    }

    /// Flushes and closes the handle. Best-effort: still flushes and marks the handle closed even
    /// if streams were left open, but logs a warning in that case (see the crate's error handling
    /// design). Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let _span = trace_span!("HeapFile::close").entered();

        if self.inner.borrow().closed {
            return Ok(());
        }

        let (live_writers, live_readers) = {
            let guard = self.inner.borrow();
            (guard.live_writers, guard.live_readers)
        };
        if live_writers > 0 || live_readers > 0 {
            warn!(live_writers, live_readers, "closing heap file with streams still live");
        }

        self.flush()?;
        self.inner.borrow_mut().closed = true;
        Ok(())
    }
}

/// Splits the borrow so the allocator can take `&mut Directory` and `&F` independently without
/// fighting the borrow checker over disjoint fields of the same struct.
fn split_file_and_directory<F>(inner: &mut Inner<F>) -> (&F, &mut Directory) {
    (&inner.file, &mut inner.directory)
}

impl<F> Drop for HeapFile<F> {
    fn drop(&mut self) {
        // Best-effort only: Drop cannot propagate I/O errors, and the crate's close() is the
        // documented way to surface them. A caller that wants flush failures reported must call
        // close() explicitly.
        if !self.inner.borrow().closed {
            if let Ok(mut guard) = self.inner.try_borrow_mut() {
                guard.closed = true;
            }
        }
    }
}
