//! Benchmark helpers for the logbook journal store.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// A repeatable payload of `size` bytes.
#[must_use]
pub fn sample_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}
