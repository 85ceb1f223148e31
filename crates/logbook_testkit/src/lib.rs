//! # Logbook Testkit
//!
//! Shared testing machinery for the logbook journal store:
//!
//! - [`fixtures`] - temporary journal stores with automatic cleanup and
//!   restart/crash helpers
//! - [`generators`] - deterministic payload builders and proptest
//!   strategies for records and operation interleavings
//!
//! The crate-level property tests under `tests/` exercise the journal
//! invariants (read-back fidelity, flush idempotence, watermark
//! monotonicity, continuity, restart round-trips) against randomized
//! workloads.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

pub use fixtures::TestJournal;
