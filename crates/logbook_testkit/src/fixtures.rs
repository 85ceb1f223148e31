//! Temporary journal stores for tests.

use logbook_core::{JournalConfig, JournalStore, LocalJournal};
use logbook_storage::BufferPool;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A writable journal in a temporary directory, removed on drop.
///
/// The fixture keeps the buffer pool and configuration around so the
/// store can be reopened against the same directory, either cleanly
/// ([`reopen`](Self::reopen)) or as a crash survivor
/// ([`crash_and_recover`](Self::crash_and_recover)).
pub struct TestJournal {
    /// The open store.
    pub journal: LocalJournal,
    /// The pool shared across reopens.
    pub pool: Arc<BufferPool>,
    config: JournalConfig,
    dir: TempDir,
}

impl TestJournal {
    /// Opens a fresh store with the given configuration.
    pub fn open(config: JournalConfig) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let pool = Arc::new(BufferPool::new());
        let journal = LocalJournal::recover(
            dir.path().join("journal"),
            0,
            config.clone(),
            Arc::clone(&pool),
        )
        .expect("recover empty journal");
        Self {
            journal,
            pool,
            config,
            dir,
        }
    }

    /// Opens a store with tiny headerless segments of `data_size` bytes.
    ///
    /// Small segments force frequent rollover, which is where most of
    /// the interesting behavior lives.
    pub fn tiny(data_size: usize) -> Self {
        Self::open(
            JournalConfig::new()
                .file_header_size(0)
                .file_data_size(data_size),
        )
    }

    /// Path of the journal directory.
    pub fn base(&self) -> std::path::PathBuf {
        self.dir.path().join("journal")
    }

    /// Appends every record and returns each record's start position.
    pub fn fill(&self, records: &[Vec<u8>]) -> Vec<u64> {
        records
            .iter()
            .map(|record| {
                let end = self.journal.append(record).expect("append record");
                end - record.len() as u64
            })
            .collect()
    }

    /// Closes the store and recovers it from the same directory.
    pub fn reopen(self) -> Self {
        self.journal.close().expect("close journal");
        self.recover_in_place()
    }

    /// Drops the store without closing, losing unflushed data, then
    /// recovers from whatever reached the directory.
    pub fn crash_and_recover(self) -> Self {
        self.recover_in_place()
    }

    fn recover_in_place(self) -> Self {
        let Self {
            journal,
            pool,
            config,
            dir,
        } = self;
        drop(journal);
        let journal = LocalJournal::recover(
            dir.path().join("journal"),
            0,
            config.clone(),
            Arc::clone(&pool),
        )
        .expect("recover journal");
        Self {
            journal,
            pool,
            config,
            dir,
        }
    }

    /// Reads one record back by its start position.
    pub fn read_record(&self, offset: u64, len: usize) -> Vec<u8> {
        self.journal
            .read(offset, len)
            .expect("read record")
            .expect("record position resolves to a segment")
    }
}

/// Asserts that adjacent segments abut without gaps or overlaps.
pub fn assert_continuous(journal: &dyn JournalStore, data_size: u64) {
    let starts = journal.segment_starts();
    for pair in starts.windows(2) {
        assert_eq!(
            pair[1],
            pair[0] + data_size,
            "segments {} and {} do not abut",
            pair[0],
            pair[1]
        );
    }
}

/// Asserts that a directory's segment files abut on disk.
pub fn assert_files_continuous(base: &Path, header_size: u64) {
    let mut files: Vec<(u64, u64)> = std::fs::read_dir(base)
        .expect("read journal dir")
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let start: u64 = entry.file_name().to_str()?.parse().ok()?;
            let len = entry.metadata().ok()?.len();
            Some((start, len.saturating_sub(header_size)))
        })
        .collect();
    files.sort_unstable();
    for pair in files.windows(2) {
        assert_eq!(
            pair[1].0,
            pair[0].0 + pair[0].1,
            "files {} and {} leave a gap",
            pair[0].0,
            pair[1].0
        );
    }
}
