//! Position-addressed journal stores.
//!
//! A journal is a logical sequence of bytes addressed by monotone 64-bit
//! positions, persisted as a directory of segment files. Each segment
//! covers a contiguous block of positions and is named by the decimal
//! encoding of its starting position:
//!
//! ```text
//! <base>/
//! ├─ 0            # positions [0, data_size)
//! ├─ 134217728    # positions [data_size, 2 * data_size)
//! └─ 268435456    # ...
//! ```
//!
//! Two variants share this layout:
//!
//! - [`LocalJournal`] - the writable workhorse: append, flush, truncate,
//!   compact
//! - [`ImmutableJournal`] - read-only; populated by whole-segment file
//!   transfers on follower nodes
//!
//! ## Continuity
//!
//! Adjacent segments always abut: each non-last segment spans exactly
//! `data_size` bytes, so the next segment's name equals the previous
//! name plus `data_size`. Recovery walks the directory and refuses to
//! open a store whose segment set has gaps.
//!
//! ## Records
//!
//! The store treats records as opaque blobs; lengths are tracked by the
//! caller. A record is never split across segments: when the tail lacks
//! room, it is closed and the record starts the next segment. The
//! skipped remainder of the closed segment is padding, and the segment's
//! file is extended to its full span when it is flushed so the on-disk
//! layout stays continuous.

mod immutable;
mod store;

pub use immutable::ImmutableJournal;
pub use store::LocalJournal;

use crate::error::{JournalError, JournalResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// The operations a journal store exposes to higher layers.
///
/// Both store variants implement the full contract; operations a variant
/// cannot honor return [`JournalError::Unsupported`] (`append_file` on
/// the writable store, mutations on the immutable store).
pub trait JournalStore: Send + Sync {
    /// Appends one record; returns the new maximum position.
    ///
    /// The returned position is the record's end; the record starts at
    /// `new_max - bytes.len()`.
    fn append(&self, bytes: &[u8]) -> JournalResult<u64>;

    /// Appends a batch of records back to back in one segment; returns
    /// the new maximum position.
    fn append_all(&self, batches: &[&[u8]]) -> JournalResult<u64>;

    /// Reads `len` bytes starting at `position`.
    ///
    /// Returns `None` when no segment covers the position (only possible
    /// on an empty store). Positions outside `[min, max)` are rejected.
    fn read(&self, position: u64, len: usize) -> JournalResult<Option<Vec<u8>>>;

    /// Reads an 8-byte big-endian integer at `position`.
    fn read_long(&self, position: u64) -> JournalResult<Option<i64>>;

    /// Writes dirty segment pages to their files.
    fn flush(&self) -> JournalResult<()>;

    /// Discards everything at positions `>= given_max`.
    fn truncate(&self, given_max: u64) -> JournalResult<()>;

    /// Drops whole segments entirely below `given_min`; returns the
    /// number of bytes deleted.
    fn compact(&self, given_min: u64) -> JournalResult<u64>;

    /// Installs a complete segment file received from an external
    /// transfer.
    fn append_file(&self, src: &Path) -> JournalResult<()>;

    /// Logical start of live data.
    fn min(&self) -> u64;

    /// Starting position of the first segment on disk (`min` if empty).
    fn physical_min(&self) -> u64;

    /// One past the last appended byte (`min` if empty).
    fn max(&self) -> u64;

    /// Position up to which all bytes are persisted.
    fn flushed(&self) -> u64;

    /// Store directory.
    fn base_path(&self) -> &Path;

    /// Free bytes on the store's filesystem.
    fn free_space(&self) -> JournalResult<u64>;

    /// Total bytes on the store's filesystem.
    fn total_space(&self) -> JournalResult<u64>;

    /// Number of segments currently in the store.
    fn segment_count(&self) -> usize;

    /// Starting positions of all segments, ascending.
    fn segment_starts(&self) -> Vec<u64>;

    /// Removes every segment and the store directory itself.
    fn delete(&self) -> JournalResult<()>;

    /// Flushes and unloads every segment and releases pooled pages.
    ///
    /// Keeps processing remaining segments after a failure; the first
    /// error is returned.
    fn close(&self) -> JournalResult<()>;
}

/// A segment file discovered on disk during recovery.
pub(crate) struct ScannedSegment {
    pub start: u64,
    pub path: PathBuf,
    /// Size of the file's data region (file length minus header).
    pub data_len: u64,
}

/// Enumerates segment files in `base`, sorted by starting position.
///
/// Only regular files with all-digit decimal names participate. A file
/// is kept when it starts at or after `min_hint`, or when its tail byte
/// reaches past it.
pub(crate) fn scan_segments(
    base: &Path,
    min_hint: u64,
    header_size: usize,
) -> JournalResult<Vec<ScannedSegment>> {
    let mut scanned = Vec::new();
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(start) = name.parse::<u64>() else {
            continue;
        };
        let data_len = entry
            .metadata()?
            .len()
            .saturating_sub(header_size as u64);
        if start >= min_hint || start + data_len > min_hint {
            scanned.push(ScannedSegment {
                start,
                path: entry.path(),
                data_len,
            });
        } else {
            info!(
                file = %entry.path().display(),
                min_hint,
                "ignoring segment entirely below the min hint"
            );
        }
    }
    scanned.sort_by_key(|segment| segment.start);
    Ok(scanned)
}

/// Checks that the scanned segments cover a gapless position range.
pub(crate) fn verify_continuity(scanned: &[ScannedSegment], base: &Path) -> JournalResult<()> {
    let Some(first) = scanned.first() else {
        return Ok(());
    };
    let mut position = first.start;
    for segment in scanned {
        if segment.start != position {
            return Err(JournalError::corrupted(format!(
                "segments are not continuous: expected {position}, found {} in {}",
                segment.start,
                base.display()
            )));
        }
        position += segment.data_len;
    }
    Ok(())
}
