//! Test data generators and proptest strategies.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A deterministic pseudo-random payload of `len` bytes.
///
/// The same `(len, seed)` pair always produces the same bytes, so
/// payloads can be regenerated for verification instead of stored.
#[must_use]
pub fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

/// Strategy for one record of 1 to `max_len` arbitrary bytes.
///
/// Records are never empty: an empty append is a no-op and has no
/// position to read back.
pub fn record_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=max_len)
}

/// Strategy for a batch of records sized to fit a single segment.
pub fn records_strategy(
    max_len: usize,
    max_count: usize,
) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(record_strategy(max_len), 1..=max_count)
}

/// Strategy for an append/flush interleaving: `true` means flush after
/// that append.
pub fn flush_mask_strategy(len: usize) -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_deterministic() {
        assert_eq!(payload(32, 7), payload(32, 7));
        assert_ne!(payload(32, 7), payload(32, 8));
    }

    #[test]
    fn payload_has_requested_length() {
        assert_eq!(payload(0, 1).len(), 0);
        assert_eq!(payload(100, 1).len(), 100);
    }
}
