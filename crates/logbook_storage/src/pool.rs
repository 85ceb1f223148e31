//! Preloaded buffer pool.
//!
//! Segment pages are large (128 MiB by default) and churn as segments
//! load and unload. Allocating them fresh on every load stalls the write
//! path, so idle pages are pooled per size class and handed back out on
//! the next load.
//!
//! Each size class carries a preload policy registered by its users:
//! at least `core` idle buffers are kept eagerly allocated, and at most
//! `max` are retained when idle. Multiple stores of the same segment size
//! register against the same class; registrations are refcounted and the
//! `core`/`max` values of concurrent registrants are combined by maximum.

use parking_lot::Mutex;
use std::collections::HashMap;

/// A process-wide pool of fixed-size page buffers.
///
/// The pool is shared by handle (`Arc<BufferPool>`) rather than through a
/// hidden singleton, so tests can substitute a fresh instance.
///
/// # Thread Safety
///
/// All operations are safe to call from any thread. None of them block
/// on I/O; `borrow` may allocate.
#[derive(Debug, Default)]
pub struct BufferPool {
    classes: Mutex<HashMap<usize, SizeClass>>,
}

#[derive(Debug, Default)]
struct SizeClass {
    registrations: usize,
    core: usize,
    max: usize,
    idle: Vec<Box<[u8]>>,
}

impl BufferPool {
    /// Creates an empty pool with no registered size classes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user of `size`-byte buffers.
    ///
    /// At least `core` idle buffers are allocated eagerly; at most `max`
    /// idle buffers are retained by [`release`](Self::release). Repeated
    /// registrations for the same size are refcounted, and the largest
    /// `core` and `max` among live registrants win.
    pub fn add_preload(&self, size: usize, core: usize, max: usize) {
        let mut classes = self.classes.lock();
        let class = classes.entry(size).or_default();
        class.registrations += 1;
        class.core = class.core.max(core);
        class.max = class.max.max(max);
        while class.idle.len() < class.core {
            class.idle.push(zeroed(size));
        }
    }

    /// Drops one registration for `size`-byte buffers.
    ///
    /// When the last registration goes away, all idle buffers of that
    /// size are freed.
    pub fn remove_preload(&self, size: usize) {
        let mut classes = self.classes.lock();
        if let Some(class) = classes.get_mut(&size) {
            class.registrations = class.registrations.saturating_sub(1);
            if class.registrations == 0 {
                classes.remove(&size);
            }
        }
    }

    /// Takes a buffer of exactly `size` bytes.
    ///
    /// Returns an idle pooled buffer when one is available, otherwise
    /// allocates. Freshly allocated buffers are zeroed; reused buffers
    /// retain stale content and the caller is responsible for tracking
    /// how much of the buffer it has written.
    #[must_use]
    pub fn borrow(&self, size: usize) -> Box<[u8]> {
        let mut classes = self.classes.lock();
        if let Some(class) = classes.get_mut(&size) {
            if let Some(buffer) = class.idle.pop() {
                return buffer;
            }
        }
        drop(classes);
        zeroed(size)
    }

    /// Returns a buffer to the pool.
    ///
    /// The buffer is retained if its size class holds fewer than `max`
    /// idle buffers, and freed otherwise. Buffers of unregistered sizes
    /// are freed immediately. Never blocks.
    pub fn release(&self, buffer: Box<[u8]>) {
        let mut classes = self.classes.lock();
        if let Some(class) = classes.get_mut(&buffer.len()) {
            if class.idle.len() < class.max {
                class.idle.push(buffer);
            }
        }
    }

    /// Number of idle buffers currently pooled for `size`.
    #[must_use]
    pub fn idle_count(&self, size: usize) -> usize {
        self.classes
            .lock()
            .get(&size)
            .map_or(0, |class| class.idle.len())
    }
}

fn zeroed(size: usize) -> Box<[u8]> {
    vec![0u8; size].into_boxed_slice()
}
