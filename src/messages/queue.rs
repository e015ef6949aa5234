//! Fixed-depth control queue over a shared FIFO

use std::sync::Arc;

use bytemuck::Zeroable;

use crate::error::{AudioError, Result};
use crate::fifo::FifoBuffer;
use crate::memory::{RegionConfig, SharedMemoryRegion};

use super::record::{ControlMessage, RawMessage};

/// Number of records the queue holds
pub const MESSAGE_QUEUE_DEPTH: u32 = 128;

const RECORD_SIZE: usize = std::mem::size_of::<RawMessage>();

/// Single-producer single-consumer queue of [`ControlMessage`]s.
///
/// The service writes, the client reads. Writers on the service side must
/// serialize among themselves; the queue itself takes no locks.
///
/// The last slot is kept for a terminal event (see
/// [`ControlMessage::is_terminal`]), so a queue that overflowed can still
/// tell the client it was disconnected.
#[derive(Debug)]
pub struct ControlQueue {
    fifo: FifoBuffer,
}

impl ControlQueue {
    /// Allocate an empty queue in a new region
    pub fn allocate(config: RegionConfig) -> Result<Self> {
        Ok(Self {
            fifo: FifoBuffer::allocate(config, MESSAGE_QUEUE_DEPTH, RECORD_SIZE)?,
        })
    }

    /// Attach to a queue the peer already created
    pub fn attach(region: Arc<SharedMemoryRegion>) -> Result<Self> {
        Ok(Self {
            fifo: FifoBuffer::attach(region, MESSAGE_QUEUE_DEPTH, RECORD_SIZE)?,
        })
    }

    /// Region backing the queue
    pub fn region(&self) -> &Arc<SharedMemoryRegion> {
        self.fifo.region()
    }

    /// Append a message. Fails with `WouldBlock` when the reader fell
    /// `MESSAGE_QUEUE_DEPTH - 1` records behind, or the full depth for a
    /// terminal event.
    pub fn write(&self, message: &ControlMessage) -> Result<()> {
        let limit = if message.is_terminal() {
            MESSAGE_QUEUE_DEPTH
        } else {
            MESSAGE_QUEUE_DEPTH - 1
        };
        // Only the writer adds records, so the count cannot grow under us.
        if self.fifo.frames_available() >= limit {
            return Err(AudioError::would_block("control queue"));
        }
        let raw = message.to_raw();
        if self.fifo.write(bytemuck::bytes_of(&raw), 1) == 1 {
            Ok(())
        } else {
            Err(AudioError::would_block("control queue"))
        }
    }

    /// Take the oldest message, if any.
    ///
    /// A record of unknown kind is consumed and reported as `Internal`.
    pub fn read(&self) -> Result<Option<ControlMessage>> {
        let mut raw = RawMessage::zeroed();
        if self.fifo.read(bytemuck::bytes_of_mut(&mut raw), 1) == 0 {
            return Ok(None);
        }
        ControlMessage::from_raw(&raw).map(Some)
    }

    /// Records waiting to be read
    pub fn pending(&self) -> u32 {
        self.fifo.frames_available()
    }

    /// Store a raw record as-is. Lets tests inject malformed records.
    #[cfg(test)]
    pub(crate) fn write_raw(&self, raw: &RawMessage) -> bool {
        self.fifo.write(bytemuck::bytes_of(raw), 1) == 1
    }
}
