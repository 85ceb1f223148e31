//! # Logbook Storage
//!
//! Low-level persistence primitives for the logbook journal store.
//!
//! This crate knows nothing about journal positions, continuity, or
//! recovery policy. It provides exactly two building blocks:
//!
//! - [`BufferPool`] - a process-wide pool of fixed-size page buffers with
//!   a preload (core/max) policy, shared by every store of the same
//!   segment size
//! - [`SegmentFile`] - one physical file holding a contiguous block of
//!   journal data, cached in a pooled page, with append-only writes at
//!   its tail, random reads, and rollback
//!
//! The journal semantics (position arithmetic, segment rollover,
//! continuity checks) live in `logbook_core`, which composes these
//! primitives.
//!
//! ## Example
//!
//! ```no_run
//! use logbook_storage::{BufferPool, SegmentFile};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(BufferPool::new());
//! pool.add_preload(1024, 0, 2);
//!
//! let segment = SegmentFile::new(0, Path::new("journal/0"), 128, 1024, Arc::clone(&pool));
//! let written = segment.append(b"hello").unwrap();
//! assert_eq!(written, 5);
//! segment.flush().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod pool;
mod segment;

pub use error::{StorageError, StorageResult};
pub use pool::BufferPool;
pub use segment::SegmentFile;
