//! The in-memory page handle: mediates between byte-level record operations and one on-disk
//! page (§4.1).

use crate::error::{Error, Result};
use sync_file::{ReadAt, WriteAt};
use tracing::trace;
use zerocopy::byteorder::{I64, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned, BE};

/// Fixed value written at the start of every page's payload-independent prefix. A mismatch on
/// load means the page was never written by this library, or the file is corrupted.
pub(crate) const MAGIC: i64 = 0xABFA_FCFD;

/// Size in bytes of the on-disk page prefix (continuation address + magic word).
pub(crate) const PAGE_HEADER_LEN: usize = 16;

/// The raw, fixed-size prefix of every on-disk page.
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct PageHeaderRaw {
    continuation: I64<BE>,
    magic: I64<BE>,
}

/// `u16`-length-prefixed string, used only for the file header's version field (§6). This is
/// kept here, next to [`PageHeaderRaw`], because both are small fixed-endian wire structures
/// read directly off the front of the file.
pub(crate) fn read_be_u16_prefixed_string(buf: &[u8]) -> Option<(String, &[u8])> {
    let (len_raw, rest) = U16::<BE>::ref_from_prefix(buf)?;
    let len = len_raw.get() as usize;
    if rest.len() < len {
        return None;
    }
    let (s_bytes, rest) = rest.split_at(len);
    let s = std::str::from_utf8(s_bytes).ok()?.to_owned();
    Some((s, rest))
}

/// Encodes `s` as a `u16`-length-prefixed UTF-8 string.
pub(crate) fn write_be_u16_prefixed_string(s: &str, out: &mut Vec<u8>) {
    let len = u16::try_from(s.len()).expect("version string too long");
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// An in-memory handle to one on-disk page.
///
/// Note the intentional asymmetry described in the crate's design notes: [`Self::flush`] writes
/// only [`Self::data_index`] bytes of the payload, not the whole buffer. A page reloaded from
/// disk can therefore contain stale bytes beyond whatever a record's directory entry says is
/// valid; callers (the record reader) are responsible for clipping to that length.
pub(crate) struct PageHandle {
    address: i64,
    buffer: Vec<u8>,
    data_index: usize,
    continuation: i64,
    has_been_flushed: bool,
}

impl PageHandle {
    /// Creates a handle for a page that does not yet exist on disk. Its magic word and payload
    /// are written the first time it is flushed.
    pub(crate) fn new(address: i64, page_data_size: usize) -> Self {
        Self {
            address,
            buffer: vec![0u8; page_data_size],
            data_index: 0,
            continuation: 0,
            has_been_flushed: false,
        }
    }

    /// Loads an existing page from disk. Fails with [`Error::CorruptedPage`] if the magic word
    /// does not match.
    pub(crate) fn load<F: ReadAt>(file: &F, address: i64, page_data_size: usize) -> Result<Self> {
        let mut header_bytes = [0u8; PAGE_HEADER_LEN];
        file.read_exact_at(&mut header_bytes, address as u64)?;
        let header =
            PageHeaderRaw::read_from(&header_bytes[..]).expect("fixed-size prefix always parses");

        if header.magic.get() != MAGIC {
            return Err(Error::CorruptedPage { address });
        }

        let mut buffer = vec![0u8; page_data_size];
        file.read_exact_at(&mut buffer, address as u64 + PAGE_HEADER_LEN as u64)?;

        Ok(Self {
            address,
            buffer,
            data_index: 0,
            continuation: header.continuation.get(),
            has_been_flushed: false,
        })
    }

    pub(crate) fn address(&self) -> i64 {
        self.address
    }

    pub(crate) fn page_data_size(&self) -> usize {
        self.buffer.len()
    }

    /// True iff the cursor has not yet reached the end of the payload area.
    pub(crate) fn has_more(&self) -> bool {
        self.data_index < self.buffer.len()
    }

    pub(crate) fn has_continuation(&self) -> bool {
        self.continuation != 0
    }

    pub(crate) fn continuation(&self) -> i64 {
        self.continuation
    }

    pub(crate) fn set_continuation(&mut self, continuation: i64) {
        if self.continuation != continuation {
            self.continuation = continuation;
            self.has_been_flushed = false;
        }
    }

    /// Reads at most one byte from the cursor. Returns `None` if the page has no more bytes.
    pub(crate) fn read_next_byte(&mut self) -> Option<u8> {
        if !self.has_more() {
            return None;
        }
        let b = self.buffer[self.data_index];
        self.data_index += 1;
        Some(b)
    }

    /// Copies up to `dst.len()` bytes from the cursor into `dst`. Returns the number copied.
    pub(crate) fn read_bytes(&mut self, dst: &mut [u8]) -> usize {
        let available = self.buffer.len() - self.data_index;
        let n = available.min(dst.len());
        dst[..n].copy_from_slice(&self.buffer[self.data_index..self.data_index + n]);
        self.data_index += n;
        n
    }

    /// Writes one byte at the cursor. Returns `false` if the page is already full.
    pub(crate) fn write_byte(&mut self, b: u8) -> bool {
        if !self.has_more() {
            return false;
        }
        self.buffer[self.data_index] = b;
        self.data_index += 1;
        self.has_been_flushed = false;
        true
    }

    /// Copies up to `src.len()` bytes into the page at the cursor. Returns the number copied
    /// (bounded by remaining capacity).
    pub(crate) fn write_bytes(&mut self, src: &[u8]) -> usize {
        let capacity = self.buffer.len() - self.data_index;
        let n = capacity.min(src.len());
        self.buffer[self.data_index..self.data_index + n].copy_from_slice(&src[..n]);
        self.data_index += n;
        if n > 0 {
            self.has_been_flushed = false;
        }
        n
    }

    /// Writes the continuation address, magic word, and the bytes written so far (not the full
    /// buffer) to disk. Idempotent: a second call with no intervening mutation does nothing.
    pub(crate) fn flush<F: WriteAt>(&mut self, file: &F) -> Result<()> {
        if self.has_been_flushed {
            return Ok(());
        }

        trace!(address = self.address, data_index = self.data_index, "flushing page");

        let header = PageHeaderRaw {
            continuation: I64::new(self.continuation),
            magic: I64::new(MAGIC),
        };

        let mut out = Vec::with_capacity(PAGE_HEADER_LEN + self.data_index);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.buffer[..self.data_index]);
        file.write_all_at(&out, self.address as u64)?;

        self.has_been_flushed = true;
        Ok(())
    }
}

/// Reads just the continuation pointer of the page at `address`, without reading or validating
/// the rest of the page. Used by the allocator when walking the free chain (§4.2), where the
/// payload is irrelevant and re-reading it for every hop would be wasteful.
pub(crate) fn read_continuation_only<F: ReadAt>(file: &F, address: i64) -> Result<i64> {
    let mut header_bytes = [0u8; PAGE_HEADER_LEN];
    file.read_exact_at(&mut header_bytes, address as u64)?;
    let header =
        PageHeaderRaw::read_from(&header_bytes[..]).expect("fixed-size prefix always parses");
    if header.magic.get() != MAGIC {
        return Err(Error::CorruptedPage { address });
    }
    Ok(header.continuation.get())
}

/// Overwrites just the continuation pointer of the page at `address`, leaving the magic word and
/// payload untouched. Used to link/unlink pages in the free chain.
pub(crate) fn write_continuation_only<F: WriteAt>(
    file: &F,
    address: i64,
    continuation: i64,
) -> Result<()> {
    let value = I64::<BE>::new(continuation);
    file.write_all_at(value.as_bytes(), address as u64)?;
    Ok(())
}
