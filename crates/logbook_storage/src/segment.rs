//! Segment file.
//!
//! A segment is one physical file holding a contiguous block of journal
//! data. The file layout is:
//!
//! ```text
//! | header (header_size bytes, opaque) | data (up to data_size bytes) |
//! ```
//!
//! The header region is reserved for upper layers and never interpreted
//! here; data begins at file offset `header_size`. The file is named and
//! addressed by the segment's starting position, but this module only
//! deals in positions relative to the data region.
//!
//! ## Page lifecycle
//!
//! The data region is cached in a page borrowed from the [`BufferPool`].
//! A segment starts `UNLOADED` (on-disk only); the page is materialized
//! lazily on the first append or read, re-reading previously persisted
//! bytes from the file. `unload` returns the page to the pool and is only
//! legal when the segment is clean; `force_unload` drops the page
//! unconditionally and is reserved for callers that are about to delete
//! the file anyway.
//!
//! The physical file is created lazily by the first `flush`, so a
//! segment that never flushes leaves nothing on disk.
//!
//! ## Concurrency
//!
//! One writer may append while readers read and a flusher flushes. Page
//! content is protected by a mutex; `write_pos`/`flush_pos` are atomics
//! so position snapshots never block on the page lock.

use crate::error::{StorageError, StorageResult};
use crate::pool::BufferPool;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One segment file of the journal: a `data_size`-byte block cached in a
/// pooled page, with append-only writes, random reads, and rollback.
pub struct SegmentFile {
    /// Starting position of this segment in the logical journal.
    start: u64,
    path: PathBuf,
    header_size: usize,
    data_size: usize,
    pool: Arc<BufferPool>,
    /// In-memory copy of the data region; `None` while unloaded.
    page: Mutex<Option<Box<[u8]>>>,
    /// Cached OS handle; opened lazily by the first flush or page load.
    file: Mutex<Option<File>>,
    /// Bytes appended to this segment.
    write_pos: AtomicU64,
    /// Bytes persisted to the file.
    flush_pos: AtomicU64,
    write_closed: AtomicBool,
}

impl SegmentFile {
    /// Creates a brand-new, empty segment.
    ///
    /// No file is created and no page is allocated until first use.
    #[must_use]
    pub fn new(
        start: u64,
        path: &Path,
        header_size: usize,
        data_size: usize,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            start,
            path: path.to_path_buf(),
            header_size,
            data_size,
            pool,
            page: Mutex::new(None),
            file: Mutex::new(None),
            write_pos: AtomicU64::new(0),
            flush_pos: AtomicU64::new(0),
            write_closed: AtomicBool::new(false),
        }
    }

    /// Reattaches a segment discovered on disk during recovery.
    ///
    /// `persisted` is the size of the file's data region; everything in
    /// it is treated as both written and flushed. The segment is closed
    /// for writing when full.
    #[must_use]
    pub fn recovered(
        start: u64,
        path: &Path,
        header_size: usize,
        data_size: usize,
        pool: Arc<BufferPool>,
        persisted: u64,
    ) -> Self {
        let persisted = persisted.min(data_size as u64);
        let segment = Self::new(start, path, header_size, data_size, pool);
        segment.write_pos.store(persisted, Ordering::Release);
        segment.flush_pos.store(persisted, Ordering::Release);
        segment
            .write_closed
            .store(persisted == data_size as u64, Ordering::Release);
        segment
    }

    /// Starting position of this segment.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Path of the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capacity of the data region in bytes.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Bytes appended so far.
    #[must_use]
    pub fn write_pos(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Bytes persisted to the file so far.
    #[must_use]
    pub fn flush_pos(&self) -> u64 {
        self.flush_pos.load(Ordering::Acquire)
    }

    /// Remaining append capacity in bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data_size - self.write_pos() as usize
    }

    /// Whether the segment refuses further appends.
    #[must_use]
    pub fn write_closed(&self) -> bool {
        self.write_closed.load(Ordering::Acquire)
    }

    /// Whether all appended bytes have been flushed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.flush_pos() == self.write_pos()
    }

    /// Whether the page is currently materialized in memory.
    #[must_use]
    pub fn has_page(&self) -> bool {
        self.page.lock().is_some()
    }

    /// Appends bytes at the tail of the data region.
    ///
    /// Writes as much of `data` as fits in the remaining capacity and
    /// returns the number of bytes consumed. The store layer never
    /// submits a record larger than the remaining space; it rolls over
    /// to a fresh segment first. Reaching `data_size` closes the segment
    /// for writing.
    pub fn append(&self, data: &[u8]) -> StorageResult<usize> {
        self.append_vectored(&[data])
    }

    /// Vectored append: writes the buffers back to back.
    ///
    /// Like [`append`](Self::append), consumes buffers from the front
    /// until the segment is full and returns the total bytes consumed.
    pub fn append_vectored(&self, buffers: &[&[u8]]) -> StorageResult<usize> {
        let mut slot = self.page.lock();
        let page = self.page_mut(&mut slot)?;

        let start = self.write_pos.load(Ordering::Acquire) as usize;
        let mut pos = start;
        for data in buffers {
            let n = data.len().min(self.data_size - pos);
            page[pos..pos + n].copy_from_slice(&data[..n]);
            pos += n;
            if n < data.len() {
                break;
            }
        }

        self.write_pos.store(pos as u64, Ordering::Release);
        if pos == self.data_size {
            self.write_closed.store(true, Ordering::Release);
        }
        Ok(pos - start)
    }

    /// Reads `len` bytes at `rel_pos` within the data region.
    ///
    /// Loads the page from disk when the segment is unloaded. The range
    /// must lie within the written region.
    pub fn read(&self, rel_pos: u64, len: usize) -> StorageResult<Vec<u8>> {
        let written = self.write_pos();
        if rel_pos + len as u64 > written {
            return Err(StorageError::ReadPastEnd {
                offset: rel_pos,
                len,
                written,
            });
        }
        let mut slot = self.page.lock();
        let page = self.page_mut(&mut slot)?;
        let rel_pos = rel_pos as usize;
        Ok(page[rel_pos..rel_pos + len].to_vec())
    }

    /// Reads an 8-byte big-endian integer at `rel_pos`.
    pub fn read_long(&self, rel_pos: u64) -> StorageResult<i64> {
        let bytes = self.read(rel_pos, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(i64::from_be_bytes(raw))
    }

    /// Writes the dirty range `[flush_pos, write_pos)` to the file.
    ///
    /// Creates the file on first flush. Advances `flush_pos` but does not
    /// sync; call [`force`](Self::force) for durability against power
    /// loss.
    ///
    /// A write-closed segment spans its full capacity in the journal's
    /// position space even when appends stopped short of it, so flushing
    /// one extends its file with zeros to the full `data_size` and
    /// settles both positions there. Recovery relies on every non-last
    /// file covering exactly `data_size` bytes.
    pub fn flush(&self) -> StorageResult<()> {
        let mut slot = self.page.lock();
        let flushed = self.flush_pos.load(Ordering::Acquire);
        let written = self.write_pos.load(Ordering::Acquire);
        let full = self.data_size as u64;
        let pad = self.write_closed.load(Ordering::Acquire) && written < full;
        if flushed >= written && !pad {
            return Ok(());
        }

        let mut file_slot = self.file.lock();
        let file = self.open_file(&mut file_slot)?;
        if flushed < written {
            // flush_pos < write_pos implies the page is resident: unload
            // refuses dirty pages and force_unload is only used on
            // segments about to be deleted.
            if let Some(page) = slot.as_ref() {
                file.seek(SeekFrom::Start(self.header_size as u64 + flushed))?;
                file.write_all(&page[flushed as usize..written as usize])?;
                self.flush_pos.store(written, Ordering::Release);
            }
        }
        if pad {
            if let Some(page) = slot.as_mut() {
                page[written as usize..].fill(0);
            }
            file.set_len(self.header_size as u64 + full)?;
            self.write_pos.store(full, Ordering::Release);
            self.flush_pos.store(full, Ordering::Release);
        }
        Ok(())
    }

    /// Syncs file content to stable storage.
    ///
    /// A segment that was never flushed has no file and nothing to sync.
    pub fn force(&self) -> StorageResult<()> {
        let mut file_slot = self.file.lock();
        if file_slot.is_none() && !self.path.exists() {
            return Ok(());
        }
        let file = self.open_file(&mut file_slot)?;
        file.sync_data()?;
        Ok(())
    }

    /// Rolls the written length back to `rel_pos`.
    ///
    /// Discards appended bytes beyond `rel_pos`; if some of them were
    /// already flushed, the file is truncated to match. A segment rolled
    /// back below its capacity accepts appends again.
    pub fn rollback(&self, rel_pos: u64) -> StorageResult<()> {
        let _slot = self.page.lock();
        self.write_pos.store(rel_pos, Ordering::Release);
        if rel_pos < self.data_size as u64 {
            self.write_closed.store(false, Ordering::Release);
        }
        if self.flush_pos.load(Ordering::Acquire) > rel_pos {
            let mut file_slot = self.file.lock();
            let file = self.open_file(&mut file_slot)?;
            file.set_len(self.header_size as u64 + rel_pos)?;
            file.sync_data()?;
            self.flush_pos.store(rel_pos, Ordering::Release);
        }
        Ok(())
    }

    /// Marks the segment as accepting no further appends.
    pub fn close_write(&self) {
        self.write_closed.store(true, Ordering::Release);
    }

    /// Returns the page to the pool.
    ///
    /// Fails with [`StorageError::DirtyUnload`] when unflushed bytes
    /// would be lost; flush first.
    pub fn unload(&self) -> StorageResult<()> {
        let mut slot = self.page.lock();
        if !self.is_clean() {
            return Err(StorageError::DirtyUnload {
                path: self.path.clone(),
            });
        }
        if let Some(page) = slot.take() {
            self.pool.release(page);
        }
        Ok(())
    }

    /// Returns the page to the pool, discarding any unflushed bytes.
    ///
    /// Only for rollback and delete paths that also remove the file.
    pub fn force_unload(&self) {
        if let Some(page) = self.page.lock().take() {
            self.pool.release(page);
        }
    }

    /// Materializes the page, re-reading persisted bytes when present.
    fn page_mut<'s>(&self, slot: &'s mut Option<Box<[u8]>>) -> StorageResult<&'s mut [u8]> {
        if slot.is_none() {
            let mut page = self.pool.borrow(self.data_size);
            // A missing page means the segment is clean, so flush_pos
            // covers everything that logically exists.
            let persisted = self.flush_pos.load(Ordering::Acquire) as usize;
            if persisted > 0 {
                let mut file_slot = self.file.lock();
                let file = self.open_file(&mut file_slot)?;
                file.seek(SeekFrom::Start(self.header_size as u64))?;
                file.read_exact(&mut page[..persisted])?;
            }
            *slot = Some(page);
        }
        match slot {
            Some(page) => Ok(page),
            None => unreachable!("page installed above"),
        }
    }

    fn open_file<'s>(&self, slot: &'s mut Option<File>) -> StorageResult<&'s mut File> {
        if slot.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;
            *slot = Some(file);
        }
        match slot {
            Some(file) => Ok(file),
            None => unreachable!("file opened above"),
        }
    }
}

impl Drop for SegmentFile {
    fn drop(&mut self) {
        if let Some(page) = self.page.get_mut().take() {
            self.pool.release(page);
        }
    }
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("start", &self.start)
            .field("write_pos", &self.write_pos())
            .field("flush_pos", &self.flush_pos())
            .field("write_closed", &self.write_closed())
            .field("has_page", &self.has_page())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn segment_at(dir: &Path, start: u64, header: usize, data: usize) -> SegmentFile {
        let pool = Arc::new(BufferPool::new());
        SegmentFile::new(start, &dir.join(start.to_string()), header, data, pool)
    }

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 16);

        assert_eq!(segment.append(b"hello").unwrap(), 5);
        assert_eq!(segment.write_pos(), 5);
        assert_eq!(segment.read(0, 5).unwrap(), b"hello");
    }

    #[test]
    fn append_consumes_only_remaining() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 8);

        assert_eq!(segment.append(b"abcdef").unwrap(), 6);
        // Only 2 of 5 bytes fit.
        assert_eq!(segment.append(b"xyzzy").unwrap(), 2);
        assert_eq!(segment.write_pos(), 8);
        assert!(segment.write_closed());
    }

    #[test]
    fn vectored_append_is_contiguous() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 16);

        let written = segment.append_vectored(&[b"ab", b"cd", b"ef"]).unwrap();
        assert_eq!(written, 6);
        assert_eq!(segment.read(0, 6).unwrap(), b"abcdef");
    }

    #[test]
    fn read_past_write_pos_fails() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 16);
        segment.append(b"abc").unwrap();

        let result = segment.read(2, 4);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn read_long_big_endian() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 16);
        segment.append(&42i64.to_be_bytes()).unwrap();

        assert_eq!(segment.read_long(0).unwrap(), 42);
    }

    #[test]
    fn no_file_until_flush() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 4, 16);
        segment.append(b"data").unwrap();

        assert!(!segment.path().exists());
        segment.flush().unwrap();
        assert!(segment.path().exists());
        // header (4) + data (4)
        assert_eq!(std::fs::metadata(segment.path()).unwrap().len(), 8);
    }

    #[test]
    fn flush_is_incremental() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 16);

        segment.append(b"aaaa").unwrap();
        segment.flush().unwrap();
        assert_eq!(segment.flush_pos(), 4);
        assert!(segment.is_clean());

        segment.append(b"bb").unwrap();
        assert!(!segment.is_clean());
        segment.flush().unwrap();
        assert_eq!(segment.flush_pos(), 6);
        assert_eq!(std::fs::metadata(segment.path()).unwrap().len(), 6);
    }

    #[test]
    fn flush_pads_closed_partial_segment() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 2, 8);

        segment.append(b"abcdef").unwrap();
        segment.close_write();
        segment.flush().unwrap();

        // File covers the full span: header (2) + data_size (8).
        assert_eq!(std::fs::metadata(segment.path()).unwrap().len(), 10);
        assert_eq!(segment.write_pos(), 8);
        assert_eq!(segment.flush_pos(), 8);
        assert!(segment.is_clean());
        // The padding reads back as zeros.
        assert_eq!(segment.read(6, 2).unwrap(), &[0, 0]);
    }

    #[test]
    fn flush_pads_unloaded_closed_segment() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 8);

        segment.append(b"abcd").unwrap();
        segment.flush().unwrap();
        segment.unload().unwrap();

        segment.close_write();
        segment.flush().unwrap();

        assert_eq!(std::fs::metadata(segment.path()).unwrap().len(), 8);
        assert_eq!(segment.read(4, 4).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn flush_when_clean_is_noop() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 16);
        segment.flush().unwrap();
        assert!(!segment.path().exists());
    }

    #[test]
    fn unload_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 2, 16);

        segment.append(b"persist me").unwrap();
        segment.flush().unwrap();
        segment.unload().unwrap();
        assert!(!segment.has_page());

        // Read transparently reloads the page from disk.
        assert_eq!(segment.read(0, 10).unwrap(), b"persist me");
        assert!(segment.has_page());
    }

    #[test]
    fn unload_dirty_fails() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 16);
        segment.append(b"dirty").unwrap();

        assert!(matches!(
            segment.unload(),
            Err(StorageError::DirtyUnload { .. })
        ));
        segment.flush().unwrap();
        segment.unload().unwrap();
    }

    #[test]
    fn rollback_unflushed_bytes() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 16);

        segment.append(b"abcdef").unwrap();
        segment.rollback(3).unwrap();
        assert_eq!(segment.write_pos(), 3);
        assert_eq!(segment.read(0, 3).unwrap(), b"abc");
        // Nothing was flushed, so no file was touched.
        assert!(!segment.path().exists());
    }

    #[test]
    fn rollback_truncates_flushed_file() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 2, 16);

        segment.append(b"abcdef").unwrap();
        segment.flush().unwrap();
        segment.rollback(2).unwrap();

        assert_eq!(segment.flush_pos(), 2);
        assert_eq!(std::fs::metadata(segment.path()).unwrap().len(), 4);
    }

    #[test]
    fn rollback_reopens_closed_segment() {
        let dir = tempdir().unwrap();
        let segment = segment_at(dir.path(), 0, 0, 4);

        segment.append(b"full").unwrap();
        assert!(segment.write_closed());

        segment.rollback(2).unwrap();
        assert!(!segment.write_closed());
        assert_eq!(segment.append(b"xy").unwrap(), 2);
    }

    #[test]
    fn recovered_segment_reads_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("32");
        {
            let segment = segment_at(dir.path(), 32, 2, 8);
            segment.append(b"abcd").unwrap();
            segment.flush().unwrap();
        }

        let pool = Arc::new(BufferPool::new());
        let segment = SegmentFile::recovered(32, &path, 2, 8, pool, 4);
        assert_eq!(segment.write_pos(), 4);
        assert!(segment.is_clean());
        assert!(!segment.write_closed());
        assert_eq!(segment.read(0, 4).unwrap(), b"abcd");
    }

    #[test]
    fn recovered_full_segment_is_write_closed() {
        let pool = Arc::new(BufferPool::new());
        let dir = tempdir().unwrap();
        let segment = SegmentFile::recovered(0, &dir.path().join("0"), 0, 8, pool, 8);
        assert!(segment.write_closed());
    }

    #[test]
    fn force_unload_returns_page_to_pool() {
        let dir = tempdir().unwrap();
        let pool = Arc::new(BufferPool::new());
        pool.add_preload(16, 0, 2);
        let segment =
            SegmentFile::new(0, &dir.path().join("0"), 0, 16, Arc::clone(&pool));

        segment.append(b"doomed").unwrap();
        segment.force_unload();
        assert!(!segment.has_page());
        assert_eq!(pool.idle_count(16), 1);
    }

    #[test]
    fn header_region_is_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0");

        // An upper layer stamps the header before the store flushes data.
        std::fs::write(&path, [0xA5u8; 4]).unwrap();

        let pool = Arc::new(BufferPool::new());
        let segment = SegmentFile::new(0, &path, 4, 16, pool);
        segment.append(b"data").unwrap();
        segment.flush().unwrap();

        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content[..4], &[0xA5u8; 4]);
        assert_eq!(&content[4..], b"data");
    }
}
