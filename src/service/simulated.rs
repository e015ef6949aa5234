//! Simulated devices
//!
//! A [`SimulatedDevice`] runs a thread that wakes once per burst period and
//! moves one burst through every attached FIFO: playback discards the frames,
//! capture writes silence. For each FIFO it counts xruns and publishes a
//! hardware timestamp of the frames moved through it, and it can be told to
//! fail for tests.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;

use crate::clock::{frames_to_nanos, monotonic_nanos, sleep_until_nanos, Timestamp};
use crate::error::{AudioError, Result};
use crate::fifo::FifoBuffer;
use crate::memory::RegionConfig;
use crate::stream::Direction;
use crate::sync::TwoSlotPublisher;

use super::device::{AudioDevice, DeviceFormat, DeviceProvider};

/// Failure switches for a simulated device
#[derive(Debug, Clone, Copy)]
struct Faults {
    fail_start: bool,
    fail_stop: bool,
    disconnected: bool,
    hardware_timestamps: bool,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            fail_start: false,
            fail_stop: false,
            disconnected: false,
            hardware_timestamps: true,
        }
    }
}

/// A FIFO the device services, with its own counters
struct AttachedFifo {
    fifo: Arc<FifoBuffer>,
    frames: i64,
    xruns: u32,
    timestamps: Arc<TwoSlotPublisher<Timestamp>>,
}

impl AttachedFifo {
    fn new(fifo: Arc<FifoBuffer>) -> Self {
        Self {
            fifo,
            frames: 0,
            xruns: 0,
            timestamps: Arc::new(TwoSlotPublisher::new()),
        }
    }
}

/// State shared with the device thread
struct DeviceShared {
    running: AtomicBool,
    fifos: Mutex<Vec<AttachedFifo>>,
    frames_moved: AtomicU64,
    faults: Mutex<Faults>,
}

impl DeviceShared {
    fn process_burst(&self, direction: Direction, burst: u32) {
        let publish = self.faults.lock().hardware_timestamps;
        let now = monotonic_nanos();
        for attached in self.fifos.lock().iter_mut() {
            let moved = match direction {
                Direction::Output => attached.fifo.discard(burst),
                Direction::Input => attached.fifo.write_zeros(burst),
            };
            self.frames_moved.fetch_add(moved as u64, Ordering::Relaxed);
            attached.frames += moved as i64;
            if moved < burst {
                attached.xruns += 1;
            }
            if publish {
                attached.timestamps.write(Timestamp::new(attached.frames, now));
            }
        }
    }

    fn with_attached<R>(&self, fifo: &Arc<FifoBuffer>, f: impl FnOnce(&AttachedFifo) -> R) -> Option<R> {
        self.fifos
            .lock()
            .iter()
            .find(|attached| Arc::ptr_eq(&attached.fifo, fifo))
            .map(f)
    }
}

/// A device backed by a timer thread instead of hardware
pub struct SimulatedDevice {
    id: i32,
    direction: Direction,
    format: DeviceFormat,
    mappable: bool,
    shared: Arc<DeviceShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedDevice {
    pub fn new(id: i32, direction: Direction, format: DeviceFormat) -> Self {
        Self {
            id,
            direction,
            format,
            mappable: true,
            shared: Arc::new(DeviceShared {
                running: AtomicBool::new(false),
                fifos: Mutex::new(Vec::new()),
                frames_moved: AtomicU64::new(0),
                faults: Mutex::new(Faults::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Whether exclusive streams may map the device buffer
    pub fn with_mappable(mut self, mappable: bool) -> Self {
        self.mappable = mappable;
        self
    }

    /// Make the next `start` calls fail
    pub fn set_fail_start(&self, fail: bool) {
        self.shared.faults.lock().fail_start = fail;
    }

    /// Make the next `stop` calls fail
    pub fn set_fail_stop(&self, fail: bool) {
        self.shared.faults.lock().fail_stop = fail;
    }

    /// Enable or disable hardware timestamp publication
    pub fn set_hardware_timestamps(&self, enabled: bool) {
        self.shared.faults.lock().hardware_timestamps = enabled;
    }

    /// Simulate the device going away. Every later call fails and the thread
    /// stops.
    pub fn disconnect(&self) {
        self.shared.faults.lock().disconnected = true;
        self.halt();
    }

    /// Frames moved through all attached FIFOs so far
    pub fn frames_moved(&self) -> u64 {
        self.shared.frames_moved.load(Ordering::Relaxed)
    }

    /// Number of attached FIFOs
    pub fn attached_count(&self) -> usize {
        self.shared.fifos.lock().len()
    }

    fn check_connected(&self) -> Result<()> {
        if self.shared.faults.lock().disconnected {
            return Err(AudioError::disconnected(format!("Device {} is gone", self.id)));
        }
        Ok(())
    }

    fn halt(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("Device {} thread panicked", self.id);
            }
        }
    }
}

impl AudioDevice for SimulatedDevice {
    fn id(&self) -> i32 {
        self.id
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn format(&self) -> DeviceFormat {
        self.format
    }

    fn start(&self) -> Result<()> {
        self.check_connected()?;
        if self.shared.faults.lock().fail_start {
            return Err(AudioError::internal(format!("Device {} failed to start", self.id)));
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let direction = self.direction;
        let burst = self.format.frames_per_burst.max(1) as u32;
        let period = frames_to_nanos(burst as i64, self.format.sample_rate).max(1);

        let handle = thread::Builder::new()
            .name(format!("audiopipe-dev{}", self.id))
            .spawn(move || {
                let mut next = monotonic_nanos();
                while shared.running.load(Ordering::Acquire) {
                    next += period;
                    sleep_until_nanos(next);
                    if !shared.running.load(Ordering::Acquire) {
                        break;
                    }
                    shared.process_burst(direction, burst);
                }
            })
            .map_err(|e| AudioError::no_memory_io(e, "Failed to spawn device thread"))?;
        *worker = Some(handle);

        log::debug!("Simulated device {} ({}) started", self.id, self.direction);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.check_connected()?;
        if self.shared.faults.lock().fail_stop {
            return Err(AudioError::internal(format!("Device {} failed to stop", self.id)));
        }
        self.halt();
        log::debug!("Simulated device {} ({}) stopped", self.id, self.direction);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn attach(&self, fifo: Arc<FifoBuffer>) -> Result<()> {
        self.check_connected()?;
        let mut fifos = self.shared.fifos.lock();
        if !fifos.iter().any(|attached| Arc::ptr_eq(&attached.fifo, &fifo)) {
            fifos.push(AttachedFifo::new(fifo));
        }
        Ok(())
    }

    fn detach(&self, fifo: &Arc<FifoBuffer>) -> Result<()> {
        self.shared
            .fifos
            .lock()
            .retain(|attached| !Arc::ptr_eq(&attached.fifo, fifo));
        self.check_connected()
    }

    fn hardware_timestamp(&self, fifo: &Arc<FifoBuffer>) -> Option<Timestamp> {
        // Read outside the device lock; the publisher never blocks the writer.
        self.shared
            .with_attached(fifo, |attached| attached.timestamps.clone())
            .and_then(|timestamps| timestamps.read())
    }

    fn xrun_count(&self, fifo: &Arc<FifoBuffer>) -> u32 {
        self.shared.with_attached(fifo, |attached| attached.xruns).unwrap_or(0)
    }

    fn map_exclusive_buffer(&self, capacity: u32, region: RegionConfig) -> Result<Arc<FifoBuffer>> {
        self.check_connected()?;
        if !self.mappable {
            return Err(AudioError::unimplemented(format!(
                "device {} has no mappable buffer",
                self.id
            )));
        }
        let fifo = Arc::new(FifoBuffer::allocate(region, capacity, self.format.bytes_per_frame())?);
        self.attach(fifo.clone())?;
        Ok(fifo)
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.halt();
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("format", &self.format)
            .field("running", &self.is_running())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct DeviceEntry {
    format: DeviceFormat,
    mappable: bool,
}

/// Provider of simulated devices.
///
/// Keeps weak references to every instance it opened so tests can inject
/// faults into the devices the service is using.
#[derive(Default)]
pub struct SimulatedDeviceProvider {
    entries: BTreeMap<(i32, Direction), DeviceEntry>,
    opened: Mutex<Vec<Weak<SimulatedDevice>>>,
}

impl SimulatedDeviceProvider {
    /// Output device 1 and input device 2, both 48 kHz stereo i16 with
    /// 192-frame bursts
    pub fn new() -> Self {
        Self::empty()
            .with_device(1, Direction::Output, DeviceFormat::default())
            .with_device(2, Direction::Input, DeviceFormat::default())
    }

    /// Provider without any devices
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a device with a mappable buffer
    pub fn with_device(mut self, id: i32, direction: Direction, format: DeviceFormat) -> Self {
        self.entries.insert((id, direction), DeviceEntry { format, mappable: true });
        self
    }

    /// Add a device that cannot serve exclusive streams
    pub fn with_unmappable_device(mut self, id: i32, direction: Direction, format: DeviceFormat) -> Self {
        self.entries.insert((id, direction), DeviceEntry { format, mappable: false });
        self
    }

    /// Live instances of a device, oldest first
    pub fn instances(&self, device_id: i32, direction: Direction) -> Vec<Arc<SimulatedDevice>> {
        let mut opened = self.opened.lock();
        opened.retain(|w| w.strong_count() > 0);
        opened
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|d| d.id == device_id && d.direction == direction)
            .collect()
    }
}

impl DeviceProvider for SimulatedDeviceProvider {
    fn default_device_id(&self, direction: Direction) -> i32 {
        self.entries
            .keys()
            .find(|(_, d)| *d == direction)
            .map(|(id, _)| *id)
            .unwrap_or(crate::config::UNSPECIFIED)
    }

    fn open_device(&self, device_id: i32, direction: Direction) -> Result<Arc<dyn AudioDevice>> {
        let entry = self.entries.get(&(device_id, direction)).ok_or_else(|| {
            AudioError::unavailable(format!("No {} device with id {}", direction, device_id))
        })?;
        let device = Arc::new(SimulatedDevice::new(device_id, direction, entry.format).with_mappable(entry.mappable));
        self.opened.lock().push(Arc::downgrade(&device));
        Ok(device)
    }
}
