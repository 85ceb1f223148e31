//! Property tests for the journal store invariants.

use logbook_core::{JournalConfig, JournalStore};
use logbook_testkit::fixtures::{assert_continuous, assert_files_continuous, TestJournal};
use logbook_testkit::generators::{flush_mask_strategy, payload, records_strategy};
use proptest::prelude::*;

const DATA_SIZE: usize = 16;
const MAX_RECORDS: usize = 24;

/// Records close to the segment size, with headers in play, survive a
/// restart byte for byte.
#[test]
fn large_records_round_trip() {
    let fixture = TestJournal::open(
        JournalConfig::new()
            .file_header_size(16)
            .file_data_size(512),
    );
    let records: Vec<Vec<u8>> = (0..8u64).map(|i| payload(100 + i as usize * 13, i)).collect();
    let offsets = fixture.fill(&records);

    let fixture = fixture.reopen();
    for (record, &offset) in records.iter().zip(&offsets) {
        assert_eq!(&fixture.read_record(offset, record.len()), record);
    }
}

proptest! {
    /// Every appended record reads back at its returned position, no
    /// matter how appends and flushes interleave.
    #[test]
    fn records_read_back(
        records in records_strategy(DATA_SIZE, MAX_RECORDS),
        mask in flush_mask_strategy(MAX_RECORDS),
    ) {
        let fixture = TestJournal::tiny(DATA_SIZE);
        let mut offsets = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let end = fixture.journal.append(record).unwrap();
            offsets.push(end - record.len() as u64);
            if mask[i % mask.len()] {
                fixture.journal.flush().unwrap();
            }
        }
        for (record, &offset) in records.iter().zip(&offsets) {
            prop_assert_eq!(&fixture.read_record(offset, record.len()), record);
        }
    }

    /// A second flush with no new appends writes nothing and leaves the
    /// watermark where it was.
    #[test]
    fn flush_is_idempotent(records in records_strategy(DATA_SIZE, MAX_RECORDS)) {
        let fixture = TestJournal::tiny(DATA_SIZE);
        fixture.fill(&records);

        fixture.journal.flush().unwrap();
        let flushed = fixture.journal.flushed();
        prop_assert_eq!(flushed, fixture.journal.max());

        fixture.journal.flush().unwrap();
        prop_assert_eq!(fixture.journal.flushed(), flushed);
    }

    /// `min`, `flushed`, and `max` never move backwards under appends,
    /// flushes, and compactions.
    #[test]
    fn watermarks_are_monotone(
        records in records_strategy(DATA_SIZE, MAX_RECORDS),
        mask in flush_mask_strategy(MAX_RECORDS),
    ) {
        let fixture = TestJournal::tiny(DATA_SIZE);
        let mut last = (0u64, 0u64, 0u64);
        for (i, record) in records.iter().enumerate() {
            fixture.journal.append(record).unwrap();
            if mask[i % mask.len()] {
                fixture.journal.flush().unwrap();
                // Compaction may only move min forward.
                let target = fixture.journal.flushed().min(
                    fixture.journal.min() + record.len() as u64,
                );
                if target > fixture.journal.min() {
                    fixture.journal.compact(target).unwrap();
                }
            }
            let now = (
                fixture.journal.min(),
                fixture.journal.flushed(),
                fixture.journal.max(),
            );
            prop_assert!(now.0 >= last.0);
            prop_assert!(now.1 >= last.1);
            prop_assert!(now.2 >= last.2);
            prop_assert!(now.0 <= now.1 && now.1 <= now.2);
            last = now;
        }
    }

    /// Segments abut in memory and on disk after any workload.
    #[test]
    fn continuity_holds(
        records in records_strategy(DATA_SIZE, MAX_RECORDS),
    ) {
        let fixture = TestJournal::tiny(DATA_SIZE);
        fixture.fill(&records);
        fixture.journal.flush().unwrap();

        assert_continuous(&fixture.journal, DATA_SIZE as u64);
        assert_files_continuous(&fixture.base(), 0);
    }

    /// Closing and recovering reproduces every record at its original
    /// position.
    #[test]
    fn restart_round_trip(records in records_strategy(DATA_SIZE, MAX_RECORDS)) {
        let fixture = TestJournal::tiny(DATA_SIZE);
        let offsets = fixture.fill(&records);
        let max = fixture.journal.max();

        let fixture = fixture.reopen();
        prop_assert_eq!(fixture.journal.max(), max);
        prop_assert_eq!(fixture.journal.flushed(), max);
        for (record, &offset) in records.iter().zip(&offsets) {
            prop_assert_eq!(&fixture.read_record(offset, record.len()), record);
        }
    }

    /// A crash preserves exactly the flushed prefix: flushed records
    /// survive, unflushed ones vanish.
    #[test]
    fn crash_preserves_flushed_prefix(
        records in records_strategy(DATA_SIZE, MAX_RECORDS),
        split in 0usize..=MAX_RECORDS,
    ) {
        let fixture = TestJournal::tiny(DATA_SIZE);
        let split = split.min(records.len());
        let flushed_records = &records[..split];

        let offsets = fixture.fill(flushed_records);
        fixture.journal.flush().unwrap();
        let flushed = fixture.journal.flushed();

        // The rest never reaches disk before the crash.
        fixture.fill(&records[split..]);

        let fixture = fixture.crash_and_recover();
        prop_assert_eq!(fixture.journal.max(), flushed);
        prop_assert_eq!(fixture.journal.flushed(), flushed);
        for (record, &offset) in flushed_records.iter().zip(&offsets) {
            prop_assert_eq!(&fixture.read_record(offset, record.len()), record);
        }
    }
}
