//! The page allocator and free-list (§4.2).
//!
//! The free chain reuses the on-page continuation field; deallocating a chain never rewrites
//! payload bytes, only continuation pointers. Allocation draws from the free chain before ever
//! extending the file.

use crate::directory::Directory;
use crate::error::Result;
use crate::page::{read_continuation_only, write_continuation_only};
use sync_file::{ReadAt, WriteAt};
use tracing::{trace, trace_span};

/// Allocates one page address, given the on-disk page size (continuation + magic + payload).
/// The caller must treat the result as an uninitialized page (build it with
/// [`crate::page::PageHandle::new`]); the magic word and payload are written on its first flush.
pub(crate) fn allocate<F: ReadAt + WriteAt>(
    dir: &mut Directory,
    file: &F,
    page_size: i64,
) -> Result<i64> {
    let _span = trace_span!("alloc::allocate").entered();
    if dir.first_deallocated_page != 0 {
        let address = dir.first_deallocated_page;
        let next = read_continuation_only(file, address)?;

        dir.first_deallocated_page = next;
        if dir.first_deallocated_page == 0 {
            dir.last_deallocated_page = 0;
        }

        write_continuation_only(file, address, 0)?;

        dir.mark_dirty();
        trace!(address, "allocated page from free chain");
        Ok(address)
    } else {
        let address = dir.next_free_page_address;
        dir.next_free_page_address += page_size;
        dir.mark_dirty();
        trace!(address, "allocated page by extending file");
        Ok(address)
    }
}

/// Appends the entire chain rooted at `start_address` to the free list.
pub(crate) fn deallocate_chain<F: ReadAt + WriteAt>(
    dir: &mut Directory,
    file: &F,
    start_address: i64,
) -> Result<()> {
    let _span = trace_span!("alloc::deallocate_chain", start_address).entered();
    trace!(start_address, "deallocating page chain");

    if dir.last_deallocated_page != 0 {
        write_continuation_only(file, dir.last_deallocated_page, start_address)?;
    }
    if dir.first_deallocated_page == 0 {
        dir.first_deallocated_page = start_address;
    }

    // Walk the chain to find its terminal page.
    let mut address = start_address;
    loop {
        let next = read_continuation_only(file, address)?;
        if next == 0 {
            break;
        }
        address = next;
    }
    dir.last_deallocated_page = address;

    dir.mark_dirty();
    Ok(())
}
