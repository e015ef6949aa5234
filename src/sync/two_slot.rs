//! Single writer, multiple reader latest-value slot
//!
//! The writer stores into slot `counter & 1` and then bumps the counter, so
//! the *other* slot always holds the most recent complete value. Readers
//! check the counter before and after copying that slot and retry when it
//! moved, the same before/after sequence check used for SWMR slots.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// Read attempts before a reader gives up on a fast writer
pub const MAX_READ_ATTEMPTS: usize = 3;

/// Latest-value cell with one writer and any number of readers.
///
/// Neither side blocks. A read may be one write stale but never torn.
pub struct TwoSlotPublisher<T: Copy> {
    counter: AtomicU32,
    slots: [UnsafeCell<MaybeUninit<T>>; 2],
}

impl<T: Copy> TwoSlotPublisher<T> {
    /// Create an empty publisher
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            slots: [
                UnsafeCell::new(MaybeUninit::uninit()),
                UnsafeCell::new(MaybeUninit::uninit()),
            ],
        }
    }

    /// Publish a new value.
    ///
    /// Only one thread may write. Concurrent writers corrupt the slots.
    pub fn write(&self, value: T) {
        let counter = self.counter.load(Ordering::Relaxed);
        // Orders the previous counter store before this slot write.
        fence(Ordering::Release);
        let slot = self.slots[(counter & 1) as usize].get();
        unsafe {
            std::ptr::write_volatile(slot, MaybeUninit::new(value));
        }
        self.counter.store(counter.wrapping_add(1), Ordering::Release);
    }

    /// Read the latest value.
    ///
    /// Returns `None` before the first write, or when the writer lapped the
    /// reader on every attempt.
    pub fn read(&self) -> Option<T> {
        for _ in 0..MAX_READ_ATTEMPTS {
            let before = self.counter.load(Ordering::Acquire);
            if before == 0 {
                return None;
            }

            let slot = self.slots[((before & 1) ^ 1) as usize].get();
            let value = unsafe { std::ptr::read_volatile(slot) };

            fence(Ordering::Acquire);
            let after = self.counter.load(Ordering::Relaxed);
            if after == before {
                return Some(unsafe { value.assume_init() });
            }
        }
        None
    }

    /// True once at least one value has been published
    pub fn is_valid(&self) -> bool {
        self.counter.load(Ordering::Acquire) != 0
    }

    /// Number of writes so far (wrapping)
    pub fn write_count(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }
}

impl<T: Copy> Default for TwoSlotPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + std::fmt::Debug> std::fmt::Debug for TwoSlotPublisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoSlotPublisher")
            .field("writes", &self.write_count())
            .field("latest", &self.read())
            .finish()
    }
}

unsafe impl<T: Copy + Send> Send for TwoSlotPublisher<T> {}
unsafe impl<T: Copy + Send> Sync for TwoSlotPublisher<T> {}
