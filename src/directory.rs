//! The record directory: an in-memory map from internal key to `{start page, byte count}`,
//! together with the free-list bookkeeping that travels with it on disk (§4.2, §4.3).

use std::collections::HashMap;

/// The internal key reserved for the directory's own record. Never exposed to callers.
pub(crate) const INDEX_RECORD_ID: i64 = 0;

/// `{startPageAddress, numberOfBytes}` for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DirEntry {
    pub(crate) start_page_address: i64,
    pub(crate) number_of_bytes: i32,
}

/// The record directory and the allocator state that is persisted alongside it.
///
/// This mirrors the source layout: the free-list head/tail and the allocation frontier are not
/// a separate object, they are fields on the same structure that owns the key → entry map,
/// because both are written out together as part of the file header (§4.2).
pub(crate) struct Directory {
    entries: HashMap<i64, DirEntry>,
    pub(crate) next_free_page_address: i64,
    pub(crate) first_deallocated_page: i64,
    pub(crate) last_deallocated_page: i64,
    dirty: bool,
}

impl Directory {
    pub(crate) fn new(
        next_free_page_address: i64,
        first_deallocated_page: i64,
        last_deallocated_page: i64,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            next_free_page_address,
            first_deallocated_page,
            last_deallocated_page,
            dirty: false,
        }
    }

    pub(crate) fn get(&self, key: i64) -> Option<DirEntry> {
        self.entries.get(&key).copied()
    }

    pub(crate) fn put(&mut self, key: i64, entry: DirEntry) {
        debug_assert_ne!(key, INDEX_RECORD_ID, "the directory never indexes itself");
        self.entries.insert(key, entry);
        self.dirty = true;
    }

    /// Removes the entry for `key`, if any. Does not touch the free list; callers deallocate the
    /// chain separately (see [`crate::alloc`]).
    pub(crate) fn remove(&mut self, key: i64) -> Option<DirEntry> {
        let removed = self.entries.remove(&key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Serializes the directory as `size: i32` followed by `size` `{key, start_page, num_bytes}`
    /// triples. Iteration order is unspecified (§4.3).
    pub(crate) fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.entries.len() * 20);
        out.extend_from_slice(&(self.entries.len() as i32).to_be_bytes());
        for (&key, entry) in self.entries.iter() {
            out.extend_from_slice(&key.to_be_bytes());
            out.extend_from_slice(&entry.start_page_address.to_be_bytes());
            out.extend_from_slice(&entry.number_of_bytes.to_be_bytes());
        }
        out
    }

    /// Parses the serialized form produced by [`Self::serialize`] and installs the entries,
    /// leaving the free-list fields untouched.
    pub(crate) fn load_entries(&mut self, bytes: &[u8]) -> Option<()> {
        let mut pos = 0usize;
        let size = i32::from_be_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?);
        pos += 4;

        let mut entries = HashMap::with_capacity(size.max(0) as usize);
        for _ in 0..size {
            let key = i64::from_be_bytes(bytes.get(pos..pos + 8)?.try_into().ok()?);
            pos += 8;
            let start_page_address = i64::from_be_bytes(bytes.get(pos..pos + 8)?.try_into().ok()?);
            pos += 8;
            let number_of_bytes = i32::from_be_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?);
            pos += 4;
            entries.insert(
                key,
                DirEntry {
                    start_page_address,
                    number_of_bytes,
                },
            );
        }

        self.entries = entries;
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_serialize() {
        let mut dir = Directory::new(100, 0, 0);
        dir.put(
            1,
            DirEntry {
                start_page_address: 16,
                number_of_bytes: 5,
            },
        );
        dir.put(
            -7,
            DirEntry {
                start_page_address: 48,
                number_of_bytes: 1000,
            },
        );

        let bytes = dir.serialize();

        let mut dir2 = Directory::new(0, 0, 0);
        dir2.load_entries(&bytes).expect("valid encoding");

        assert_eq!(dir2.get(1), dir.get(1));
        assert_eq!(dir2.get(-7), dir.get(-7));
        assert_eq!(dir2.get(99), None);
    }
}
