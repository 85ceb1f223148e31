//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the buffer pool and segment file layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the written region of a segment.
    #[error("read beyond written data: offset {offset}, len {len}, written {written}")]
    ReadPastEnd {
        /// The requested read offset, relative to the data region.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// Bytes written to the segment so far.
        written: u64,
    },

    /// Attempted to unload a segment page that still holds dirty bytes.
    #[error("cannot unload dirty segment page: {path}")]
    DirtyUnload {
        /// Path of the segment file.
        path: PathBuf,
    },
}
