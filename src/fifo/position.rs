//! 64-bit frame positions from wrapping FIFO counters

use super::FifoBuffer;

/// Extends one of a FIFO's wrapping counters into a monotonic `i64` frame
/// position. Must be updated at least once per wrap of the counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionTracker {
    last_raw: u32,
    position: i64,
}

impl PositionTracker {
    /// Start tracking from a raw counter value
    pub fn new(raw: u32) -> Self {
        Self {
            last_raw: raw,
            position: 0,
        }
    }

    /// Fold in the latest raw counter and return the extended position
    pub fn update(&mut self, fifo: &FifoBuffer, raw: u32) -> i64 {
        let delta = fifo.counter_distance(raw, self.last_raw);
        self.last_raw = raw;
        self.position += delta as i64;
        self.position
    }

    /// Position as of the last update
    pub fn position(&self) -> i64 {
        self.position
    }
}
