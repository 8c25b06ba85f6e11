//! File header layout, version compatibility, and the bootstrap/reopen paths (§3, §4.6, §6).

use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::page::{read_be_u16_prefixed_string, write_be_u16_prefixed_string, PageHandle};
use sync_file::{ReadAt, WriteAt};
use tracing::warn;

/// Default `pageDataSize`, used when creating a new file and no override is given.
pub(crate) const DEFAULT_PAGE_DATA_SIZE: i32 = 2048;

/// The version string this implementation writes into newly created files.
pub(crate) const CURRENT_VERSION: &str = "net.pagedheap.HeapFile Version 1";

/// Historical version string accepted for backward compatibility; never written by this
/// implementation.
pub(crate) const LEGACY_VERSION: &str = "class se.marell.bucketfile.BucketFile Version 1";

/// Byte length of the fixed-width integer fields that follow the version string:
/// `pageDataSize: i32`, `indexByteCount: i64`, `nextFreePageAddress: i64`,
/// `firstDeallocatedPage: i64`, `lastDeallocatedPage: i64`.
const ALLOC_FIELDS_LEN: usize = 4 + 8 + 8 + 8 + 8;

/// Construction options for [`crate::HeapFile`] (§4.6).
#[derive(Clone, Debug)]
pub struct HeapFileOptions {
    /// The payload size of each page. Honored only when creating a new file; an existing file's
    /// stored value always wins.
    pub page_data_size: i32,
    /// Whether to take an exclusive advisory lock on the whole file.
    pub lock: bool,
    /// Whether to open the file for reads only, rejecting any writer or mutating operation.
    pub open_read_only: bool,
}

impl Default for HeapFileOptions {
    fn default() -> Self {
        Self {
            page_data_size: DEFAULT_PAGE_DATA_SIZE,
            lock: false,
            open_read_only: false,
        }
    }
}

/// The parsed file header plus the byte offset at which it ends, which is also the fixed
/// start-page address of the directory record (§3, invariant 6).
pub(crate) struct HeaderInfo {
    pub(crate) page_data_size: i32,
    pub(crate) index_byte_count: i64,
    pub(crate) next_free_page_address: i64,
    pub(crate) first_deallocated_page: i64,
    pub(crate) last_deallocated_page: i64,
    /// Offset of the first allocation field (`pageDataSize`); used to rewrite those fields in
    /// place without touching the version string.
    pub(crate) alloc_fields_offset: u64,
    /// Offset immediately past the header; the directory's fixed start-page address.
    pub(crate) header_len: i64,
}

fn validate_version(found: &str) -> Result<()> {
    if found == CURRENT_VERSION {
        return Ok(());
    }
    if found == LEGACY_VERSION {
        warn!(version = found, "accepting legacy file version string");
        return Ok(());
    }
    Err(Error::UnsupportedVersion {
        found: found.to_owned(),
    })
}

/// Reads and validates the header of an existing file.
pub(crate) fn read_header<F: ReadAt>(file: &F) -> Result<HeaderInfo> {
    let mut len_buf = [0u8; 2];
    file.read_exact_at(&mut len_buf, 0)?;

    let str_len = u16::from_be_bytes(len_buf) as usize;
    let mut version_buf = vec![0u8; 2 + str_len];
    version_buf[..2].copy_from_slice(&len_buf);
    file.read_exact_at(&mut version_buf[2..], 2)?;

    let (version, _) = read_be_u16_prefixed_string(&version_buf)
        .ok_or_else(|| Error::UnsupportedVersion { found: String::new() })?;
    validate_version(&version)?;

    let alloc_fields_offset = version_buf.len() as u64;
    let mut fields = [0u8; ALLOC_FIELDS_LEN];
    file.read_exact_at(&mut fields, alloc_fields_offset)?;

    let page_data_size = i32::from_be_bytes(fields[0..4].try_into().unwrap());
    let index_byte_count = i64::from_be_bytes(fields[4..12].try_into().unwrap());
    let next_free_page_address = i64::from_be_bytes(fields[12..20].try_into().unwrap());
    let first_deallocated_page = i64::from_be_bytes(fields[20..28].try_into().unwrap());
    let last_deallocated_page = i64::from_be_bytes(fields[28..36].try_into().unwrap());

    Ok(HeaderInfo {
        page_data_size,
        index_byte_count,
        next_free_page_address,
        first_deallocated_page,
        last_deallocated_page,
        alloc_fields_offset,
        header_len: alloc_fields_offset as i64 + ALLOC_FIELDS_LEN as i64,
    })
}

/// Writes the header of a brand new file: the current version string followed by the
/// allocation fields, all zero except `pageDataSize`. Returns `(header_len, alloc_fields_offset)`.
pub(crate) fn write_new_header<F: WriteAt>(file: &F, page_data_size: i32) -> Result<(i64, u64)> {
    let mut out = Vec::new();
    write_be_u16_prefixed_string(CURRENT_VERSION, &mut out);
    let alloc_fields_offset = out.len() as u64;

    out.extend_from_slice(&page_data_size.to_be_bytes());
    out.extend_from_slice(&0i64.to_be_bytes()); // indexByteCount
    out.extend_from_slice(&0i64.to_be_bytes()); // nextFreePageAddress
    out.extend_from_slice(&0i64.to_be_bytes()); // firstDeallocatedPage
    out.extend_from_slice(&0i64.to_be_bytes()); // lastDeallocatedPage

    file.write_all_at(&out, 0)?;
    Ok((out.len() as i64, alloc_fields_offset))
}

/// Overwrites the five allocation fields in place, leaving the version string untouched.
pub(crate) fn rewrite_allocation_fields<F: WriteAt>(
    file: &F,
    alloc_fields_offset: u64,
    page_data_size: i32,
    index_byte_count: i64,
    next_free_page_address: i64,
    first_deallocated_page: i64,
    last_deallocated_page: i64,
) -> Result<()> {
    let mut out = Vec::with_capacity(ALLOC_FIELDS_LEN);
    out.extend_from_slice(&page_data_size.to_be_bytes());
    out.extend_from_slice(&index_byte_count.to_be_bytes());
    out.extend_from_slice(&next_free_page_address.to_be_bytes());
    out.extend_from_slice(&first_deallocated_page.to_be_bytes());
    out.extend_from_slice(&last_deallocated_page.to_be_bytes());
    file.write_all_at(&out, alloc_fields_offset)?;
    Ok(())
}

/// Writes the empty directory's single bootstrap page directly, bypassing the normal
/// record-writer path (which would need a [`crate::Inner`] that does not exist yet). Returns the
/// serialized byte count to use as `indexByteCount`.
pub(crate) fn write_initial_directory<F: WriteAt>(
    file: &F,
    directory_start_page: i64,
    page_data_size: usize,
) -> Result<i64> {
    let empty = Directory::new(0, 0, 0);
    let bytes = empty.serialize();

    let mut page = PageHandle::new(directory_start_page, page_data_size);
    let written = page.write_bytes(&bytes);
    debug_assert_eq!(written, bytes.len(), "page_data_size too small for an empty directory");
    page.flush(file)?;

    Ok(bytes.len() as i64)
}

/// Reads `byte_count` bytes starting at `start`, following continuation pages as needed. Used to
/// reconstruct the directory on reopen, before a [`crate::Inner`] (and therefore a record reader)
/// exists.
pub(crate) fn read_chain_bytes<F: ReadAt>(
    file: &F,
    start: i64,
    page_data_size: usize,
    byte_count: i64,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(byte_count.max(0) as usize);
    let mut remaining = byte_count;
    let mut address = start;

    while remaining > 0 {
        let mut page = PageHandle::load(file, address, page_data_size)?;
        let mut buf = vec![0u8; page_data_size];
        let n = page.read_bytes(&mut buf) as i64;
        let take = n.min(remaining) as usize;
        out.extend_from_slice(&buf[..take]);
        remaining -= take as i64;

        if remaining > 0 {
            if page.has_continuation() {
                address = page.continuation();
            } else {
                break;
            }
        }
    }

    Ok(out)
}
