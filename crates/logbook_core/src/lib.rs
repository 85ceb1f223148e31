//! # Logbook Core
//!
//! The segmented, position-addressed, append-only journal store at the
//! heart of a replicated-log framework.
//!
//! The journal is a logical byte sequence addressed by monotone 64-bit
//! positions and persisted as a directory of fixed-size segment files,
//! each named by its starting position. Appends land in pooled in-memory
//! pages; a flusher advances the durable watermark; compaction trims the
//! head and truncation the tail.
//!
//! This crate provides:
//! - [`JournalStore`] - the contract exposed to the replication layer
//! - [`LocalJournal`] - the writable store used on every node
//! - [`ImmutableJournal`] - the read-only store fed by segment transfers
//! - [`JournalConfig`] - sizing and back-pressure knobs
//!
//! ## Example
//!
//! ```no_run
//! use logbook_core::{BufferPool, JournalConfig, JournalStore, LocalJournal};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(BufferPool::new());
//! let journal = LocalJournal::recover("raft/journal", 0, JournalConfig::default(), pool)?;
//!
//! let end = journal.append(b"entry")?;
//! journal.flush()?;
//! assert_eq!(journal.read(end - 5, 5)?.as_deref(), Some(&b"entry"[..]));
//! # Ok::<(), logbook_core::JournalError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod journal;

pub use config::{
    JournalConfig, CACHED_FILE_CORE_COUNT_KEY, CACHED_FILE_MAX_COUNT_KEY, FILE_DATA_SIZE_KEY,
    FILE_HEADER_SIZE_KEY, MAX_DIRTY_SIZE_KEY,
};
pub use error::{JournalError, JournalResult};
pub use journal::{ImmutableJournal, JournalStore, LocalJournal};

pub use logbook_storage::{BufferPool, SegmentFile, StorageError};
