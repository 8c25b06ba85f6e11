//! The record writer: a byte stream that allocates and links pages on demand, committing the
//! directory entry only on close (§4.5).

use crate::alloc;
use crate::directory::{DirEntry, INDEX_RECORD_ID};
use crate::error::{Error, Result};
use crate::page::PageHandle;
use crate::Inner;
use std::cell::RefCell;
use std::rc::Rc;
use sync_file::{ReadAt, WriteAt};

/// Writes the bytes of one record.
///
/// Obtained from [`crate::HeapFile::get_record_writer`]. Locates the record's existing start
/// page on construction (overwriting it from the beginning) or allocates a fresh one. Nothing is
/// visible to readers until [`Self::close`] commits the directory entry; a writer dropped without
/// being closed is abandoned, per the crate's design notes.
pub struct RecordWriter<F> {
    inner: Rc<RefCell<Inner<F>>>,
    internal_key: i64,
    start_page_address: i64,
    current_page: PageHandle,
    count: i64,
    closed: bool,
}

impl<F: ReadAt + WriteAt> RecordWriter<F> {
    pub(crate) fn new(inner: Rc<RefCell<Inner<F>>>, internal_key: i64) -> Result<Self> {
        let (start_page_address, current_page) = {
            let mut guard = inner.borrow_mut();
            let page_data_size = guard.page_data_size as usize;

            let existing_start = if internal_key == INDEX_RECORD_ID {
                Some(guard.directory_start_page)
            } else {
                guard.directory.get(internal_key).map(|e| e.start_page_address)
            };

            match existing_start {
                Some(addr) => {
                    let page = PageHandle::load(&guard.file, addr, page_data_size)?;
                    (addr, page)
                }
                None => {
                    let page_size = guard.page_size;
                    let addr = alloc::allocate(&mut guard.directory, &guard.file, page_size)?;
                    (addr, PageHandle::new(addr, page_data_size))
                }
            }
        };

        inner.borrow_mut().live_writers += 1;

        Ok(Self {
            inner,
            internal_key,
            start_page_address,
            current_page,
            count: 0,
            closed: false,
        })
    }

    /// The number of bytes written so far.
    pub fn len(&self) -> i64 {
        self.count
    }

    /// True iff nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Moves to the next page, reusing the existing continuation if the current page already has
    /// one, or allocating and linking a fresh page otherwise. Flushes the old page either way
    /// before switching the cursor to the new one.
    fn advance_page(&mut self) -> Result<()> {
        let mut guard = self.inner.borrow_mut();
        let page_data_size = guard.page_data_size as usize;

        let next_page = if self.current_page.has_continuation() {
            let addr = self.current_page.continuation();
            PageHandle::load(&guard.file, addr, page_data_size)?
        } else {
            let page_size = guard.page_size;
            let addr = alloc::allocate(&mut guard.directory, &guard.file, page_size)?;
            self.current_page.set_continuation(addr);
            PageHandle::new(addr, page_data_size)
        };

        self.current_page.flush(&guard.file)?;
        self.current_page = next_page;
        Ok(())
    }

    /// Writes a single byte, transitioning to a new page first if the current one is full.
    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        if self.closed {
            return Err(Error::IllegalState("write on a closed record writer".into()));
        }
        if !self.current_page.has_more() {
            self.advance_page()?;
        }
        let wrote = self.current_page.write_byte(b);
        debug_assert!(wrote, "page was just advanced or known non-full");
        self.count += 1;
        Ok(())
    }

    /// Writes all of `buf`, transitioning across as many pages as necessary.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::IllegalState("write on a closed record writer".into()));
        }
        while !buf.is_empty() {
            if !self.current_page.has_more() {
                self.advance_page()?;
            }
            let n = self.current_page.write_bytes(buf);
            if n == 0 {
                return Err(Error::IllegalState("page has zero capacity".into()));
            }
            self.count += n as i64;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Flushes the final page, deallocates any now-surplus continuation chain, and (for ordinary
    /// records) commits the directory entry. Returns the total number of bytes written.
    /// Idempotent: a second call returns the same count without repeating side effects.
    pub fn close(&mut self) -> Result<i64> {
        if self.closed {
            return Ok(self.count);
        }

        let mut guard = self.inner.borrow_mut();

        if self.current_page.has_continuation() {
            let surplus = self.current_page.continuation();
            alloc::deallocate_chain(&mut guard.directory, &guard.file, surplus)?;
            self.current_page.set_continuation(0);
        }

        self.current_page.flush(&guard.file)?;

        if self.internal_key != INDEX_RECORD_ID {
            guard.directory.put(
                self.internal_key,
                DirEntry {
                    start_page_address: self.start_page_address,
                    number_of_bytes: self.count as i32,
                },
            );
        }

        guard.live_writers -= 1;
        guard.assert_invariants();
        drop(guard);

        self.closed = true;
        Ok(self.count)
    }
}

impl<F: ReadAt + WriteAt> std::io::Write for RecordWriter<F> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // Committing happens only on an explicit `close`, per the crate's design notes.
        Ok(())
    }
}

impl<F> Drop for RecordWriter<F> {
    fn drop(&mut self) {
        if !self.closed {
            self.inner.borrow_mut().live_writers -= 1;
        }
    }
}
