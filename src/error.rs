//! Error types for the paged heap file.

use std::path::PathBuf;

/// Errors that can occur while operating on a [`crate::HeapFile`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An advisory lock could not be acquired on the backing file because another process (or
    /// another open handle) already holds it.
    #[error("file is already locked: {path}")]
    AlreadyLocked {
        /// The path that could not be locked.
        path: PathBuf,
    },

    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file header carries a version string that this implementation does not recognize.
    #[error("unsupported file version: {found:?}")]
    UnsupportedVersion {
        /// The version string found in the file header.
        found: String,
    },

    /// A page's magic word did not match [`crate::page::MAGIC`] when loaded from disk.
    #[error("corrupted page at address {address}: bad magic word")]
    CorruptedPage {
        /// The on-disk byte offset of the offending page.
        address: i64,
    },

    /// An operation was attempted that violates the handle's exclusivity or lifecycle rules
    /// (e.g. requesting a writer while a reader is live, or using a stream after it was closed).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A reader reached the end of its record. This variant exists for API completeness (see
    /// the crate-level design notes); the stream APIs in this crate signal end-of-stream via
    /// `Ok(0)`/`Ok(None)` rather than by returning this variant.
    #[error("end of stream")]
    EndOfStream,
}

/// A convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(io_err) => io_err,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
