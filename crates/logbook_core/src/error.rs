//! Error types for journal operations.

use logbook_storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal store operations.
///
/// The store recovers nothing locally; every error is surfaced to the
/// caller, which owns the repair policy.
#[derive(Debug, Error)]
pub enum JournalError {
    /// A single append exceeds the segment data size.
    #[error("append of {len} bytes exceeds segment data size {max}: {path}")]
    TooManyBytes {
        /// Size of the rejected append.
        len: usize,
        /// Configured segment data size.
        max: usize,
        /// Store directory.
        path: PathBuf,
    },

    /// Read position is below the journal's minimum.
    #[error("position {position} underflows journal min {min}")]
    PositionUnderflow {
        /// The requested position.
        position: u64,
        /// Current minimum position.
        min: u64,
    },

    /// Read position is at or beyond the journal's maximum.
    #[error("position {position} overflows journal max {max}")]
    PositionOverflow {
        /// The requested position.
        position: u64,
        /// Current maximum position.
        max: u64,
    },

    /// Recovery found a non-continuous segment set.
    ///
    /// Fatal for this store instance; nothing is silently truncated.
    #[error("corrupted store: {message}")]
    CorruptedStore {
        /// Description of the continuity violation.
        message: String,
    },

    /// Not enough free disk space to create a new segment.
    #[error("disk full: {path}")]
    DiskFull {
        /// Store directory.
        path: PathBuf,
    },

    /// The operation is not supported by this store variant.
    #[error("operation not supported by this store: {operation}")]
    Unsupported {
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// An argument was outside the legal range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the violation.
        message: String,
    },

    /// Removing a file or directory failed.
    #[error("failed to remove {path}")]
    Remove {
        /// Path that could not be removed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Segment-level storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl JournalError {
    /// Creates a corrupted-store error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::CorruptedStore {
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
