//! Read-only journal store populated by segment transfers.

use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::journal::{scan_segments, verify_continuity, JournalStore};
use logbook_storage::{BufferPool, SegmentFile};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// The read-only sibling of [`super::LocalJournal`].
///
/// Follower nodes use this store to accept whole-segment files
/// transferred from a leader. The segment layout, position arithmetic,
/// continuity rules, and compaction semantics match the writable store;
/// only the mutation surface differs: `append`, `append_all`, `flush`,
/// and `truncate` are rejected, and new data arrives exclusively through
/// [`append_file`](JournalStore::append_file).
///
/// Every byte in the store came from a complete file, so the durable
/// watermark never trails: `flushed() == max()` at all times.
pub struct ImmutableJournal {
    base: PathBuf,
    config: JournalConfig,
    pool: Arc<BufferPool>,
    segments: RwLock<BTreeMap<u64, Arc<SegmentFile>>>,
    /// Serializes operations that mutate the segment set as a whole.
    file_map_mutex: Mutex<()>,
    left_position: AtomicU64,
    write_position: AtomicU64,
}

impl ImmutableJournal {
    /// Opens the store at `path`, recovering any segments already there.
    ///
    /// Identical discovery and continuity rules as the writable store.
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
            left_position: AtomicU64::new(left),
            write_position: AtomicU64::new(recovered),
        };
        debug!(
            min = journal.min(),
            max = journal.max(),
            base = %journal.base.display(),
            "immutable journal store loaded"
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
}

impl JournalStore for ImmutableJournal {
    fn append(&self, _bytes: &[u8]) -> JournalResult<u64> {
        Err(JournalError::Unsupported {
            operation: "append",
        })
    }

    fn append_all(&self, _batches: &[&[u8]]) -> JournalResult<u64> {
        Err(JournalError::Unsupported {
            operation: "append_all",
        })
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
        Err(JournalError::Unsupported { operation: "flush" })
    }

    fn truncate(&self, _given_max: u64) -> JournalResult<()> {
        Err(JournalError::Unsupported {
            operation: "truncate",
        })
    }

    fn compact(&self, given_min: u64) -> JournalResult<u64> {
        let _guard = self.file_map_mutex.lock();
        if given_min <= self.min() {
            return Ok(0);
        }
        if given_min > self.max() {
            return Err(JournalError::invalid_argument(format!(
                "compact position {given_min} is beyond max {}",
                self.max()
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
        Ok(deleted)
    }

    /// Installs a complete segment file received from a leader.
    ///
    /// The file's name must be the decimal encoding of the store's
    /// current `max` (or the store must be empty at position zero), so
    /// installed segments extend the journal without gaps. The file is
    /// moved into the store directory when it is not already there.
    fn append_file(&self, src: &Path) -> JournalResult<()> {
        let _guard = self.file_map_mutex.lock();

        let name = src
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                JournalError::invalid_argument(format!(
                    "segment file has no usable name: {}",
                    src.display()
                ))
            })?;
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return Err(JournalError::invalid_argument(format!(
                "segment file name is not a position: {name:?}"
            )));
        }
        let start: u64 = name.parse().map_err(|_| {
            JournalError::invalid_argument(format!("segment file name is not a position: {name:?}"))
        })?;

        let max = self.max();
        if start != max && max != 0 {
            return Err(JournalError::invalid_argument(format!(
                "segment file {name} does not continue the journal at {max}"
            )));
        }

        let file_len = fs::metadata(src)?.len();
        let data_len = file_len.saturating_sub(self.config.file_header_size as u64);
        if data_len == 0 {
            return Err(JournalError::invalid_argument(format!(
                "segment file {name} has an empty data region"
            )));
        }
        if data_len > self.config.file_data_size as u64 {
            return Err(JournalError::invalid_argument(format!(
                "segment file {name} data region of {data_len} bytes exceeds segment size {}",
                self.config.file_data_size
            )));
        }

        let dest = self.base.join(name);
        if src != dest {
            fs::rename(src, &dest)?;
        }

        let segment = Arc::new(SegmentFile::recovered(
            start,
            &dest,
            self.config.file_header_size,
            self.config.file_data_size,
            Arc::clone(&self.pool),
            data_len,
        ));

        let mut segments = self.segments.write();
        if segments.is_empty() {
            self.left_position.store(start, Ordering::Release);
        }
        segments.insert(start, segment);
        self.write_position.store(start + data_len, Ordering::Release);

        info!(
            file = %dest.display(),
            max = start + data_len,
            "installed transferred segment"
        );
        Ok(())
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

    /// Everything installed is already durable, so the watermark tracks
    /// `max` exactly.
    fn flushed(&self) -> u64 {
        self.max()
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
        let doomed: Vec<Arc<SegmentFile>> = {
            let mut segments = self.segments.write();
            std::mem::take(&mut *segments).into_values().collect()
        };
        for segment in &doomed {
            self.delete_segment_file(segment)?;
        }
        if self.base.exists() {
            fs::remove_dir(&self.base).map_err(|source| JournalError::Remove {
                path: self.base.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn close(&self) -> JournalResult<()> {
        let segments: Vec<Arc<SegmentFile>> =
            self.segments.read().values().cloned().collect();
        for segment in segments {
            segment.force_unload();
        }
        self.pool.remove_preload(self.config.file_data_size);
        Ok(())
    }
}

impl std::fmt::Debug for ImmutableJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImmutableJournal")
            .field("base", &self.base)
            .field("min", &self.min())
            .field("max", &self.max())
            .field("segments", &self.segment_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(data_size: usize) -> JournalConfig {
        JournalConfig::new()
            .file_header_size(0)
            .file_data_size(data_size)
    }

    fn open(path: &Path, data_size: usize) -> ImmutableJournal {
        ImmutableJournal::recover(path, 0, config(data_size), Arc::new(BufferPool::new()))
            .unwrap()
    }

    /// Writes a complete segment file the way a leader-side transfer
    /// would deliver it.
    fn transferred_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn mutations_are_unsupported() {
        let dir = tempdir().unwrap();
        let journal = open(&dir.path().join("journal"), 8);

        assert!(matches!(
            journal.append(b"x"),
            Err(JournalError::Unsupported { .. })
        ));
        assert!(matches!(
            journal.append_all(&[b"x"]),
            Err(JournalError::Unsupported { .. })
        ));
        assert!(matches!(
            journal.flush(),
            Err(JournalError::Unsupported { .. })
        ));
        assert!(matches!(
            journal.truncate(0),
            Err(JournalError::Unsupported { .. })
        ));
    }

    #[test]
    fn append_file_installs_segments() {
        let dir = tempdir().unwrap();
        let journal = open(&dir.path().join("journal"), 8);

        let first = transferred_file(dir.path(), "0", b"abcdefgh");
        journal.append_file(&first).unwrap();
        assert_eq!(journal.max(), 8);
        assert_eq!(journal.flushed(), 8);

        let second = transferred_file(dir.path(), "8", b"ijkl");
        journal.append_file(&second).unwrap();
        assert_eq!(journal.max(), 12);

        assert_eq!(journal.read(0, 8).unwrap().unwrap(), b"abcdefgh");
        assert_eq!(journal.read(8, 4).unwrap().unwrap(), b"ijkl");

        // Files moved into the store directory.
        assert!(journal.base_path().join("0").exists());
        assert!(journal.base_path().join("8").exists());
        assert!(!first.exists());
    }

    #[test]
    fn append_file_rejects_gaps() {
        let dir = tempdir().unwrap();
        let journal = open(&dir.path().join("journal"), 8);

        journal
            .append_file(&transferred_file(dir.path(), "0", b"abcdefgh"))
            .unwrap();

        let wrong = transferred_file(dir.path(), "16", b"zzzz");
        assert!(matches!(
            journal.append_file(&wrong),
            Err(JournalError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn append_file_rejects_non_position_names() {
        let dir = tempdir().unwrap();
        let journal = open(&dir.path().join("journal"), 8);

        let bad = transferred_file(dir.path(), "segment-1", b"abcd");
        assert!(matches!(
            journal.append_file(&bad),
            Err(JournalError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn append_file_rejects_empty_data_region() {
        let dir = tempdir().unwrap();
        let journal = ImmutableJournal::recover(
            dir.path().join("journal"),
            0,
            config(8).file_header_size(4),
            Arc::new(BufferPool::new()),
        )
        .unwrap();

        // Four header bytes and nothing else.
        let empty = transferred_file(dir.path(), "0", &[0u8; 4]);
        assert!(matches!(
            journal.append_file(&empty),
            Err(JournalError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn first_segment_may_start_anywhere_on_an_empty_store() {
        let dir = tempdir().unwrap();
        let journal = open(&dir.path().join("journal"), 8);

        // A follower that joined after compaction receives the live
        // suffix of the journal, not its history.
        let file = transferred_file(dir.path(), "16", b"abcdefgh");
        journal.append_file(&file).unwrap();

        assert_eq!(journal.min(), 16);
        assert_eq!(journal.max(), 24);
        assert_eq!(journal.read(16, 8).unwrap().unwrap(), b"abcdefgh");
        assert!(matches!(
            journal.read(8, 1),
            Err(JournalError::PositionUnderflow { .. })
        ));
    }

    #[test]
    fn recover_reads_installed_segments() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("journal");
        {
            let journal = open(&base, 8);
            journal
                .append_file(&transferred_file(dir.path(), "0", b"abcdefgh"))
                .unwrap();
            journal
                .append_file(&transferred_file(dir.path(), "8", b"ijkl"))
                .unwrap();
            journal.close().unwrap();
        }

        let journal = open(&base, 8);
        assert_eq!(journal.max(), 12);
        assert_eq!(journal.read(8, 4).unwrap().unwrap(), b"ijkl");
    }

    #[test]
    fn compact_drops_transferred_segments() {
        let dir = tempdir().unwrap();
        let journal = open(&dir.path().join("journal"), 8);

        journal
            .append_file(&transferred_file(dir.path(), "0", b"abcdefgh"))
            .unwrap();
        journal
            .append_file(&transferred_file(dir.path(), "8", b"ijklmnop"))
            .unwrap();

        let deleted = journal.compact(8).unwrap();
        assert_eq!(deleted, 8);
        assert_eq!(journal.min(), 8);
        assert_eq!(journal.segment_starts(), vec![8]);
    }
}
