//! Writable journal store.

use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::journal::{scan_segments, verify_continuity, JournalStore};
use logbook_storage::{BufferPool, SegmentFile};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// The writable, segmented, position-addressed journal store.
///
/// Appends go to the tail segment's in-memory page; a flusher thread
/// calls [`flush`](JournalStore::flush) to move dirty bytes to disk and
/// advance the durable watermark. Destructive operations (`truncate`,
/// `compact`, `delete`) are serialized against each other by an internal
/// mutex.
///
/// # Threading
///
/// The store is designed for one writer thread (`append`, `truncate`,
/// `compact`, `close`), one flusher thread (`flush`), and any number of
/// reader threads. `append` must not run concurrently with `truncate`;
/// the embedding replication layer guarantees this. `flush` tolerates
/// concurrent appends and concurrent truncation.
pub struct LocalJournal {
    base: PathBuf,
    config: JournalConfig,
    pool: Arc<BufferPool>,
    /// Segments keyed by starting position.
    segments: RwLock<BTreeMap<u64, Arc<SegmentFile>>>,
    /// Serializes operations that mutate the segment set as a whole.
    file_map_mutex: Mutex<()>,
    /// The segment currently accepting appends, if any.
    write_segment: Mutex<Option<Arc<SegmentFile>>>,
    left_position: AtomicU64,
    write_position: AtomicU64,
    flush_position: AtomicU64,
    /// Back-pressure rendezvous: the flusher signals after the durable
    /// watermark moves.
    dirty_lock: Mutex<()>,
    dirty_cv: Condvar,
}

impl LocalJournal {
    /// Opens the store at `path`, recovering any segments already there.
    ///
    /// The directory is created when missing. Discovered segments must
    /// be continuous or recovery fails with
    /// [`JournalError::CorruptedStore`]. Everything found on disk is
    /// treated as durable: `flushed` starts at `max`.
    ///
    /// `min` is a hint for the logical start of live data; segment files
    /// entirely below it are ignored.
    pub fn recover(
        path: impl AsRef<Path>,
        min: u64,
        config: JournalConfig,
        pool: Arc<BufferPool>,
    ) -> JournalResult<Self> {
        let base = path.as_ref().to_path_buf();
        config.validate()?;
        fs::create_dir_all(&base)?;

        let scanned = scan_segments(&base, min, config.file_header_size)?;
        verify_continuity(&scanned, &base)?;

        pool.add_preload(
            config.file_data_size,
            config.cached_file_core_count,
            config.cached_file_max_count,
        );

        let mut segments = BTreeMap::new();
        for discovered in &scanned {
            segments.insert(
                discovered.start,
                Arc::new(SegmentFile::recovered(
                    discovered.start,
                    &discovered.path,
                    config.file_header_size,
                    config.file_data_size,
                    Arc::clone(&pool),
                    discovered.data_len,
                )),
            );
        }

        let recovered = segments
            .values()
            .next_back()
            .map_or(min, |tail| tail.start() + tail.write_pos());
        let left = segments
            .keys()
            .next()
            .map_or(min, |first| min.max(*first));

        let journal = Self {
            base,
            config,
            pool,
            segments: RwLock::new(segments),
            file_map_mutex: Mutex::new(()),
            write_segment: Mutex::new(None),
            left_position: AtomicU64::new(left),
            write_position: AtomicU64::new(recovered),
            flush_position: AtomicU64::new(recovered),
            dirty_lock: Mutex::new(()),
            dirty_cv: Condvar::new(),
        };
        journal.reset_write_segment();

        debug!(
            min = journal.min(),
            max = journal.max(),
            base = %journal.base.display(),
            "journal store loaded"
        );
        Ok(journal)
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    fn floor_segment(&self, position: u64) -> Option<Arc<SegmentFile>> {
        let segments = self.segments.read();
        segments
            .range(..=position)
            .next_back()
            .map(|(_, segment)| Arc::clone(segment))
    }

    fn check_read_position(&self, position: u64) -> JournalResult<()> {
        let min = self.min();
        if position < min {
            return Err(JournalError::PositionUnderflow { position, min });
        }
        let max = self.max();
        if position >= max {
            return Err(JournalError::PositionOverflow { position, max });
        }
        Ok(())
    }

    /// Blocks the writer until outstanding dirty bytes drop back under
    /// the configured limit.
    fn wait_for_dirty_room(&self) {
        let limit = self.config.max_dirty_size;
        if limit == 0 {
            return;
        }
        let mut guard = self.dirty_lock.lock();
        loop {
            let dirty = self
                .write_position
                .load(Ordering::Acquire)
                .saturating_sub(self.flush_position.load(Ordering::Acquire));
            if dirty <= limit {
                return;
            }
            self.dirty_cv.wait(&mut guard);
        }
    }

    fn notify_flushed(&self) {
        if self.config.max_dirty_size == 0 {
            return;
        }
        let _guard = self.dirty_lock.lock();
        self.dirty_cv.notify_all();
    }

    /// Returns the tail segment with room for `needed` bytes, rolling
    /// over to a fresh segment when the current tail is too full.
    ///
    /// Rollover closes the tail and aligns the next segment's start at
    /// the tail's full span, so every non-last segment covers exactly
    /// `data_size` positions. The skipped remainder is padding.
    fn writable_segment(
        &self,
        tail: &mut Option<Arc<SegmentFile>>,
        needed: usize,
    ) -> JournalResult<Arc<SegmentFile>> {
        if let Some(segment) = tail.as_ref() {
            if !segment.write_closed() && segment.remaining() >= needed {
                return Ok(Arc::clone(segment));
            }
            segment.close_write();
            self.write_position
                .store(segment.start() + segment.data_size() as u64, Ordering::Release);
        }
        let segment = self.create_segment(self.write_position.load(Ordering::Acquire))?;
        *tail = Some(Arc::clone(&segment));
        Ok(segment)
    }

    /// Registers a fresh segment starting at `position`.
    ///
    /// Concurrent creators of the same position resolve to the first
    /// inserted segment. Fails with [`JournalError::DiskFull`] when the
    /// filesystem cannot hold another full segment.
    fn create_segment(&self, position: u64) -> JournalResult<Arc<SegmentFile>> {
        let mut segments = self.segments.write();
        if let Some(existing) = segments.get(&position) {
            return Ok(Arc::clone(existing));
        }
        self.check_disk_free_space()?;
        let path = self.base.join(position.to_string());
        let segment = Arc::new(SegmentFile::new(
            position,
            &path,
            self.config.file_header_size,
            self.config.file_data_size,
            Arc::clone(&self.pool),
        ));
        segments.insert(position, Arc::clone(&segment));
        Ok(segment)
    }

    fn check_disk_free_space(&self) -> JournalResult<()> {
        let needed = (self.config.file_data_size + self.config.file_header_size) as u64;
        if fs2::available_space(&self.base)? < needed {
            return Err(JournalError::DiskFull {
                path: self.base.clone(),
            });
        }
        Ok(())
    }

    /// Rolls the segment set back so nothing at or beyond `position`
    /// remains.
    fn rollback_segments(&self, position: u64) -> JournalResult<()> {
        if let Some(segment) = self.floor_segment(position) {
            if position > segment.start() {
                info!(
                    file = %segment.path().display(),
                    rel_pos = position - segment.start(),
                    "rolling back segment"
                );
                segment.rollback(position - segment.start())?;
            }
        }

        let doomed: Vec<Arc<SegmentFile>> = {
            let mut segments = self.segments.write();
            let keys: Vec<u64> = segments.range(position..).map(|(key, _)| *key).collect();
            keys.iter().filter_map(|key| segments.remove(key)).collect()
        };

        if !doomed.is_empty() {
            let mut tail = self.write_segment.lock();
            for segment in &doomed {
                if tail
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, segment))
                {
                    *tail = None;
                }
            }
        }
        for segment in &doomed {
            info!(file = %segment.path().display(), "deleting truncated segment");
            self.delete_segment_file(segment)?;
        }
        Ok(())
    }

    /// Re-selects the writable tail after the segment set changed.
    fn reset_write_segment(&self) {
        let mut tail = self.write_segment.lock();
        let segments = self.segments.read();
        *tail = segments.values().next_back().and_then(|segment| {
            let end = segment.start() + segment.data_size() as u64;
            (end > self.write_position.load(Ordering::Acquire))
                .then(|| Arc::clone(segment))
        });
    }

    /// Unloads a segment and removes its file, discarding dirty bytes.
    fn delete_segment_file(&self, segment: &SegmentFile) -> JournalResult<()> {
        segment.force_unload();
        if segment.path().exists() {
            fs::remove_file(segment.path()).map_err(|source| JournalError::Remove {
                path: segment.path().to_path_buf(),
                source,
            })?;
            debug!(file = %segment.path().display(), "segment file deleted");
        }
        Ok(())
    }

    /// Unloads every segment, removes every file, and empties the map.
    fn clear_segments(&self) -> JournalResult<()> {
        let doomed: Vec<Arc<SegmentFile>> = {
            let mut segments = self.segments.write();
            std::mem::take(&mut *segments).into_values().collect()
        };
        *self.write_segment.lock() = None;
        for segment in &doomed {
            self.delete_segment_file(segment)?;
        }
        Ok(())
    }
}

impl JournalStore for LocalJournal {
    fn append(&self, bytes: &[u8]) -> JournalResult<u64> {
        self.append_all(&[bytes])
    }

    fn append_all(&self, batches: &[&[u8]]) -> JournalResult<u64> {
        let total: usize = batches.iter().map(|bytes| bytes.len()).sum();
        if total > self.config.file_data_size {
            return Err(JournalError::TooManyBytes {
                len: total,
                max: self.config.file_data_size,
                path: self.base.clone(),
            });
        }
        if total == 0 {
            return Ok(self.max());
        }

        self.wait_for_dirty_room();

        let mut tail = self.write_segment.lock();
        let segment = self.writable_segment(&mut tail, total)?;
        let written = segment.append_vectored(batches)?;
        let new_max =
            self.write_position.fetch_add(written as u64, Ordering::AcqRel) + written as u64;
        Ok(new_max)
    }

    fn read(&self, position: u64, len: usize) -> JournalResult<Option<Vec<u8>>> {
        if len == 0 {
            return Ok(Some(Vec::new()));
        }
        self.check_read_position(position)?;
        let Some(segment) = self.floor_segment(position) else {
            return Ok(None);
        };
        Ok(Some(segment.read(position - segment.start(), len)?))
    }

    fn read_long(&self, position: u64) -> JournalResult<Option<i64>> {
        self.check_read_position(position)?;
        let Some(segment) = self.floor_segment(position) else {
            return Ok(None);
        };
        Ok(Some(segment.read_long(position - segment.start())?))
    }

    fn flush(&self) -> JournalResult<()> {
        loop {
            let flushed = self.flush_position.load(Ordering::Acquire);
            if flushed >= self.write_position.load(Ordering::Acquire) {
                break;
            }
            // Re-resolve every round: a concurrent truncate may have
            // removed the segment we were about to flush.
            let Some(segment) = self.floor_segment(flushed) else {
                // Compaction can delete the segment the watermark sat in
                // when its trailing padding never reached disk. Skip to
                // the first surviving segment.
                let next_start = self.segments.read().keys().next().copied();
                match next_start {
                    Some(start) if start > flushed => {
                        let max = self.write_position.load(Ordering::Acquire);
                        self.flush_position.store(start.min(max), Ordering::Release);
                        self.notify_flushed();
                        continue;
                    }
                    _ => break,
                }
            };
            if !segment.is_clean() || segment.write_closed() {
                // Before a segment's first write reaches disk, the one
                // before it is synced, so a crash cannot leave newer
                // bytes sitting behind a hole of missing older ones.
                if segment.flush_pos() == 0 {
                    if let Some(previous) = segment
                        .start()
                        .checked_sub(1)
                        .and_then(|key| self.floor_segment(key))
                    {
                        previous.force()?;
                    }
                }
                segment.flush()?;
            }
            let advanced = segment.start() + segment.flush_pos();
            if advanced > flushed {
                self.flush_position.store(advanced, Ordering::Release);
                self.notify_flushed();
            } else {
                break;
            }
        }
        Ok(())
    }

    fn truncate(&self, given_max: u64) -> JournalResult<()> {
        let _guard = self.file_map_mutex.lock();
        if given_max == self.max() {
            return Ok(());
        }
        info!(
            given_max,
            min = self.min(),
            max = self.max(),
            flushed = self.flushed(),
            base = %self.base.display(),
            "truncating journal"
        );
        if given_max < self.min() || given_max > self.max() {
            return Err(JournalError::invalid_argument(format!(
                "truncate position {given_max} outside [{}, {}]",
                self.min(),
                self.max()
            )));
        }

        self.rollback_segments(given_max)?;
        self.write_position.store(given_max, Ordering::Release);
        if self.flush_position.load(Ordering::Acquire) > given_max {
            self.flush_position.store(given_max, Ordering::Release);
        }
        self.reset_write_segment();
        // max dropped, so blocked writers may have room again
        self.notify_flushed();
        Ok(())
    }

    fn compact(&self, given_min: u64) -> JournalResult<u64> {
        let _guard = self.file_map_mutex.lock();
        if given_min <= self.min() {
            return Ok(0);
        }
        let flushed = self.flush_position.load(Ordering::Acquire);
        if given_min > flushed {
            return Err(JournalError::invalid_argument(format!(
                "compact position {given_min} is beyond the flushed position {flushed}"
            )));
        }

        self.left_position.store(given_min, Ordering::Release);
        let mut deleted = 0u64;
        loop {
            let first = {
                let segments = self.segments.read();
                segments.values().next().map(Arc::clone)
            };
            let Some(segment) = first else { break };
            let span = if segment.has_page() {
                segment.write_pos()
            } else {
                segment.data_size() as u64
            };
            if segment.start() + span > given_min {
                break;
            }
            self.segments.write().remove(&segment.start());
            self.delete_segment_file(&segment)?;
            deleted += span;
        }
        debug!(
            given_min,
            deleted,
            base = %self.base.display(),
            "compacted journal head"
        );
        Ok(deleted)
    }

    fn append_file(&self, _src: &Path) -> JournalResult<()> {
        Err(JournalError::Unsupported {
            operation: "append_file",
        })
    }

    fn min(&self) -> u64 {
        self.left_position.load(Ordering::Acquire)
    }

    fn physical_min(&self) -> u64 {
        self.segments
            .read()
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.min())
    }

    fn max(&self) -> u64 {
        self.write_position.load(Ordering::Acquire)
    }

    fn flushed(&self) -> u64 {
        self.flush_position.load(Ordering::Acquire)
    }

    fn base_path(&self) -> &Path {
        &self.base
    }

    fn free_space(&self) -> JournalResult<u64> {
        Ok(fs2::available_space(&self.base)?)
    }

    fn total_space(&self) -> JournalResult<u64> {
        Ok(fs2::total_space(&self.base)?)
    }

    fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    fn segment_starts(&self) -> Vec<u64> {
        self.segments.read().keys().copied().collect()
    }

    fn delete(&self) -> JournalResult<()> {
        let _guard = self.file_map_mutex.lock();
        self.clear_segments()?;
        if self.base.exists() {
            fs::remove_dir(&self.base).map_err(|source| JournalError::Remove {
                path: self.base.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn close(&self) -> JournalResult<()> {
        let mut first_error = None;
        let segments: Vec<Arc<SegmentFile>> =
            self.segments.read().values().cloned().collect();
        for segment in segments {
            if let Err(error) = segment.flush() {
                first_error.get_or_insert(JournalError::from(error));
            }
            segment.force_unload();
        }
        self.pool.remove_preload(self.config.file_data_size);
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for LocalJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalJournal")
            .field("base", &self.base)
            .field("min", &self.min())
            .field("max", &self.max())
            .field("flushed", &self.flushed())
            .field("segments", &self.segment_count())
            .finish_non_exhaustive()
    }
}
