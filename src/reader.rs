//! The record reader: a byte stream that follows a page chain up to the directory-recorded
//! length (§4.4).

use crate::directory::INDEX_RECORD_ID;
use crate::error::{Error, Result};
use crate::page::PageHandle;
use crate::Inner;
use std::cell::RefCell;
use std::rc::Rc;
use sync_file::ReadAt;

/// Reads the bytes of one record.
///
/// Obtained from [`crate::HeapFile::get_record_reader`]. Implements [`std::io::Read`] for bulk
/// transfers; [`Self::read_byte`] preserves the single-byte sentinel semantics described in the
/// crate's design notes, including the documented quirk that a record reader with zero bytes
/// remaining reports end-of-stream even if its current page buffer still has bytes in it.
pub struct RecordReader<F> {
    inner: Rc<RefCell<Inner<F>>>,
    current_page: Option<PageHandle>,
    /// Bytes remaining according to the directory. Unused (and not decremented) for the
    /// reserved directory record, whose length is not known up front.
    available: i64,
    is_index: bool,
    closed: bool,
}

impl<F: ReadAt> RecordReader<F> {
    pub(crate) fn new(
        inner: Rc<RefCell<Inner<F>>>,
        internal_key: i64,
    ) -> Result<Option<Self>> {
        let (start_page_address, available, is_index) = {
            let guard = inner.borrow();
            if internal_key == INDEX_RECORD_ID {
                (guard.directory_start_page, 0, true)
            } else {
                match guard.directory.get(internal_key) {
                    Some(entry) => (
                        entry.start_page_address,
                        entry.number_of_bytes as i64,
                        false,
                    ),
                    None => return Ok(None),
                }
            }
        };

        let current_page = {
            let guard = inner.borrow();
            let page_data_size = guard.page_data_size as usize;
            PageHandle::load(&guard.file, start_page_address, page_data_size)?
        };

        inner.borrow_mut().live_readers += 1;

        Ok(Some(Self {
            inner,
            current_page: Some(current_page),
            available,
            is_index,
            closed: false,
        }))
    }

    fn load_page(&self, address: i64) -> Result<PageHandle> {
        let guard = self.inner.borrow();
        let page_data_size = guard.page_data_size as usize;
        PageHandle::load(&guard.file, address, page_data_size)
    }

    /// An approximation of the number of bytes remaining; a lower bound, since it does not
    /// account for continuation pages not yet visited (see the crate's design notes).
    pub fn available(&self) -> i64 {
        self.available.max(0)
    }

    /// Reads a single byte, or `None` at end-of-stream.
    ///
    /// Reproduces the source quirk verbatim: for non-directory records, `available <= 0` ends
    /// the stream immediately, even if the current page still has buffered bytes.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.closed {
            return Err(Error::IllegalState("read on a closed record reader".into()));
        }

        if !self.is_index && self.available <= 0 {
            return Ok(None);
        }

        loop {
            let Some(page) = self.current_page.as_mut() else {
                return Ok(None);
            };

            if let Some(b) = page.read_next_byte() {
                if !self.is_index {
                    self.available -= 1;
                }
                return Ok(Some(b));
            }

            if page.has_continuation() {
                let next = page.continuation();
                self.current_page = Some(self.load_page(next)?);
            } else {
                self.current_page = None;
                return Ok(None);
            }
        }
    }

    /// Bulk read, accumulating across continuation transitions. Returns the number of bytes
    /// transferred, clipped to the directory-recorded length for ordinary records; `0` means
    /// end-of-stream.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::IllegalState("read on a closed record reader".into()));
        }

        let mut total = 0usize;
        while total < buf.len() {
            if !self.is_index && self.available <= 0 {
                break;
            }

            let Some(page) = self.current_page.as_mut() else {
                break;
            };

            let want = if self.is_index {
                buf.len() - total
            } else {
                (buf.len() - total).min(self.available.max(0) as usize)
            };
            let n = page.read_bytes(&mut buf[total..total + want]);
            if n > 0 {
                total += n;
                if !self.is_index {
                    self.available -= n as i64;
                }
                continue;
            }

            // The current page has no more buffered bytes; move to the next one, if any.
            if page.has_continuation() {
                let next = page.continuation();
                self.current_page = Some(self.load_page(next)?);
            } else {
                self.current_page = None;
                break;
            }
        }

        Ok(total)
    }

    /// Closes the reader, releasing its slot in the file handle's live-reader set. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.borrow_mut().live_readers -= 1;
        Ok(())
    }
}

impl<F: ReadAt> std::io::Read for RecordReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_into(buf).map_err(Into::into)
    }
}

impl<F> Drop for RecordReader<F> {
    fn drop(&mut self) {
        if !self.closed {
            self.inner.borrow_mut().live_readers -= 1;
        }
    }
}
