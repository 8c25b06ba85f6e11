//! Consistency checks run after mutating operations when `safe_mode` is enabled (§9).

use crate::directory::INDEX_RECORD_ID;
use crate::Inner;

impl<F> Inner<F> {
    /// Checks cheap in-memory invariants from §3. Called after every mutating operation when
    /// `safe_mode` is set; never runs in release builds regardless of the flag, matching the
    /// source's compile-time `SAFE_MODE` flag being downgraded to a debug-only aid here.
    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub(crate) fn assert_invariants(&self) {}

    #[cfg(debug_assertions)]
    pub(crate) fn assert_invariants(&self) {
        if !self.safe_mode {
            return;
        }

        assert!(self.page_data_size > 0, "page_data_size must be positive");

        assert_eq!(
            self.directory.first_deallocated_page == 0,
            self.directory.last_deallocated_page == 0,
            "free-chain head and tail must agree on emptiness",
        );

        assert!(
            self.directory.get(INDEX_RECORD_ID).is_none(),
            "the directory must never hold an entry for its own reserved key",
        );

        assert!(
            self.live_writers <= 1,
            "at most one writer may be live at a time",
        );
        assert!(
            self.live_writers == 0 || self.live_readers == 0,
            "a writer and a reader must never be live at the same time",
        );
    }
}
