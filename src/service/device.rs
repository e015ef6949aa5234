//! Audio device collaborator
//!
//! The service never touches hardware directly. An [`AudioDevice`] moves
//! frames between its attached FIFOs and the hardware one burst at a time;
//! a [`DeviceProvider`] opens devices by id.

use std::sync::Arc;

use crate::clock::Timestamp;
use crate::error::Result;
use crate::fifo::FifoBuffer;
use crate::memory::RegionConfig;
use crate::stream::{AudioFormat, Direction};

/// Fixed format of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: i32,
    pub samples_per_frame: i32,
    pub format: AudioFormat,
    pub frames_per_burst: i32,
}

impl DeviceFormat {
    pub fn new(sample_rate: i32, samples_per_frame: i32, format: AudioFormat, frames_per_burst: i32) -> Self {
        Self {
            sample_rate,
            samples_per_frame,
            format,
            frames_per_burst,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.samples_per_frame.max(0) as usize * self.format.bytes_per_sample()
    }
}

impl Default for DeviceFormat {
    fn default() -> Self {
        Self::new(48_000, 2, AudioFormat::I16, 192)
    }
}

/// A playback or capture device.
///
/// For output the device is the consumer of every attached FIFO, for input
/// the producer.
pub trait AudioDevice: Send + Sync {
    fn id(&self) -> i32;

    fn direction(&self) -> Direction;

    fn format(&self) -> DeviceFormat;

    /// Begin servicing attached FIFOs
    fn start(&self) -> Result<()>;

    /// Stop servicing attached FIFOs
    fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Add a FIFO to the set the device services
    fn attach(&self, fifo: Arc<FifoBuffer>) -> Result<()>;

    /// Remove a FIFO; unknown FIFOs are ignored
    fn detach(&self, fifo: &Arc<FifoBuffer>) -> Result<()>;

    /// Latest `(frames moved through fifo, time)` reported by the hardware
    /// for an attached FIFO. Counting starts over when the FIFO is attached
    /// again; detached FIFOs have none.
    fn hardware_timestamp(&self, fifo: &Arc<FifoBuffer>) -> Option<Timestamp>;

    /// Underruns (output) or overruns (input) of an attached FIFO since it
    /// was attached
    fn xrun_count(&self, fifo: &Arc<FifoBuffer>) -> u32;

    /// Map the device buffer itself as a FIFO for an exclusive stream.
    ///
    /// Devices without a mappable buffer return `Unimplemented`.
    fn map_exclusive_buffer(&self, capacity: u32, region: RegionConfig) -> Result<Arc<FifoBuffer>>;
}

/// Opens devices by id
pub trait DeviceProvider: Send + Sync {
    /// Device used when a request leaves the id unspecified
    fn default_device_id(&self, direction: Direction) -> i32;

    /// Open a device instance. Each call yields an independent instance.
    fn open_device(&self, device_id: i32, direction: Direction) -> Result<Arc<dyn AudioDevice>>;
}
