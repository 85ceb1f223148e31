//! Journal store configuration.

use crate::error::{JournalError, JournalResult};
use std::collections::HashMap;

/// Property key for [`JournalConfig::file_header_size`].
pub const FILE_HEADER_SIZE_KEY: &str = "file_header_size";
/// Property key for [`JournalConfig::file_data_size`].
pub const FILE_DATA_SIZE_KEY: &str = "file_data_size";
/// Property key for [`JournalConfig::cached_file_core_count`].
pub const CACHED_FILE_CORE_COUNT_KEY: &str = "cached_file_core_count";
/// Property key for [`JournalConfig::cached_file_max_count`].
pub const CACHED_FILE_MAX_COUNT_KEY: &str = "cached_file_max_count";
/// Property key for [`JournalConfig::max_dirty_size`].
pub const MAX_DIRTY_SIZE_KEY: &str = "max_dirty_size";

const DEFAULT_FILE_HEADER_SIZE: usize = 128;
const DEFAULT_FILE_DATA_SIZE: usize = 128 * 1024 * 1024;
const DEFAULT_CACHED_FILE_CORE_COUNT: usize = 0;
const DEFAULT_CACHED_FILE_MAX_COUNT: usize = 2;
const DEFAULT_MAX_DIRTY_SIZE: u64 = 0;

/// Configuration for opening a journal store.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Bytes reserved at the head of every segment file.
    ///
    /// The header is opaque to the store and preserved across recovery;
    /// upper layers may stamp per-segment metadata into it.
    pub file_header_size: usize,

    /// Data bytes per segment file.
    pub file_data_size: usize,

    /// Idle segment pages to keep eagerly allocated in the buffer pool.
    pub cached_file_core_count: usize,

    /// Maximum idle segment pages retained by the buffer pool.
    pub cached_file_max_count: usize,

    /// Dirty-byte limit before appends block waiting for the flusher.
    ///
    /// Zero disables back-pressure.
    pub max_dirty_size: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            file_header_size: DEFAULT_FILE_HEADER_SIZE,
            file_data_size: DEFAULT_FILE_DATA_SIZE,
            cached_file_core_count: DEFAULT_CACHED_FILE_CORE_COUNT,
            cached_file_max_count: DEFAULT_CACHED_FILE_MAX_COUNT,
            max_dirty_size: DEFAULT_MAX_DIRTY_SIZE,
        }
    }
}

impl JournalConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment header size.
    #[must_use]
    pub const fn file_header_size(mut self, size: usize) -> Self {
        self.file_header_size = size;
        self
    }

    /// Sets the segment data size.
    #[must_use]
    pub const fn file_data_size(mut self, size: usize) -> Self {
        self.file_data_size = size;
        self
    }

    /// Sets the eager page count for the buffer pool.
    #[must_use]
    pub const fn cached_file_core_count(mut self, count: usize) -> Self {
        self.cached_file_core_count = count;
        self
    }

    /// Sets the maximum idle page count for the buffer pool.
    #[must_use]
    pub const fn cached_file_max_count(mut self, count: usize) -> Self {
        self.cached_file_max_count = count;
        self
    }

    /// Sets the dirty-byte limit for append back-pressure.
    #[must_use]
    pub const fn max_dirty_size(mut self, size: u64) -> Self {
        self.max_dirty_size = size;
        self
    }

    /// Builds a configuration from string-keyed properties.
    ///
    /// Missing keys fall back to defaults; unknown keys are ignored.
    /// Values that fail to parse are rejected with
    /// [`JournalError::InvalidArgument`].
    pub fn from_properties(properties: &HashMap<String, String>) -> JournalResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            file_header_size: parse_property(
                properties,
                FILE_HEADER_SIZE_KEY,
                defaults.file_header_size,
            )?,
            file_data_size: parse_property(
                properties,
                FILE_DATA_SIZE_KEY,
                defaults.file_data_size,
            )?,
            cached_file_core_count: parse_property(
                properties,
                CACHED_FILE_CORE_COUNT_KEY,
                defaults.cached_file_core_count,
            )?,
            cached_file_max_count: parse_property(
                properties,
                CACHED_FILE_MAX_COUNT_KEY,
                defaults.cached_file_max_count,
            )?,
            max_dirty_size: parse_property(
                properties,
                MAX_DIRTY_SIZE_KEY,
                defaults.max_dirty_size,
            )?,
        })
    }

    /// Rejects configurations no store can run with.
    pub(crate) fn validate(&self) -> JournalResult<()> {
        if self.file_data_size == 0 {
            return Err(JournalError::invalid_argument(
                "file_data_size must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn parse_property<T: std::str::FromStr>(
    properties: &HashMap<String, String>,
    key: &str,
    default: T,
) -> JournalResult<T> {
    match properties.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            JournalError::invalid_argument(format!("cannot parse {key}: {raw:?}"))
        }),
    }
}
