//! Service side of one stream
//!
//! Owns the FIFO and the control queue, drives the endpoint and reports
//! every settled transition to the client as an event. While the stream runs,
//! a timestamp thread keeps the client's clock model fed.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::clock::{monotonic_nanos, ClockModel, Timestamp, TimestampScheduler};
use crate::config::UNSPECIFIED;
use crate::error::{AudioError, Result};
use crate::fifo::{FifoBuffer, PositionTracker};
use crate::memory::RegionDescriptor;
use crate::messages::{ControlMessage, ControlQueue, EventKind};
use crate::stream::{
    configuration::negotiate_capacity, Direction, StreamConfiguration, StreamRequest, StreamState,
};

use super::clients::ClientPid;
use super::endpoint::{Endpoint, EndpointManager};
use super::handles::StreamHandle;
use super::region_name;

struct TimestampWorker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Where the stream and the device's counters for its FIFO stood when the
/// stream last started. Device counters restart whenever a shared endpoint
/// re-attaches the FIFO, so reports are taken relative to this.
#[derive(Debug, Clone, Copy, Default)]
struct DeviceOrigin {
    /// Stream frame position
    position: i64,
    /// Frames the device had moved through the FIFO
    hardware: i64,
    /// Device xrun count of the FIFO
    xruns: u32,
    /// Xruns already reported to the client
    reported_xruns: u32,
}

/// Service stream controller
pub struct ServiceStream {
    owner_pid: ClientPid,
    handle: AtomicI32,
    configuration: StreamConfiguration,
    endpoint: Endpoint,
    fifo: Arc<FifoBuffer>,
    queue: Mutex<ControlQueue>,
    state: Mutex<StreamState>,
    disconnected: AtomicBool,
    closed: AtomicBool,
    device_position: Mutex<PositionTracker>,
    reported_xruns: AtomicU32,
    timestamps: Mutex<Option<TimestampWorker>>,
}

impl ServiceStream {
    /// Open a stream for `owner_pid`: pick an endpoint, check the request
    /// against the device format and allocate the shared regions.
    pub fn open(request: &StreamRequest, owner_pid: ClientPid, endpoints: &EndpointManager) -> Result<Arc<Self>> {
        request.validate()?;
        let endpoint = endpoints.open_endpoint(request)?;
        let device = endpoint.format();

        if request.sample_rate != UNSPECIFIED && request.sample_rate != device.sample_rate {
            return Err(AudioError::invalid_rate(request.sample_rate, device.sample_rate));
        }
        if request.format.is_specified() && request.format != device.format {
            return Err(AudioError::invalid_format(request.format, device.format));
        }
        if request.samples_per_frame != UNSPECIFIED && request.samples_per_frame != device.samples_per_frame {
            return Err(AudioError::out_of_range(
                "samples_per_frame",
                request.samples_per_frame as i64,
                device.samples_per_frame as i64,
                device.samples_per_frame as i64,
            ));
        }

        let config = endpoints.config();
        let fifo = match endpoint.mapped_fifo() {
            Some(fifo) => fifo.clone(),
            None => {
                let capacity = negotiate_capacity(request.buffer_capacity, device.frames_per_burst, &config.tuning);
                Arc::new(FifoBuffer::allocate(
                    config.region_config(region_name("data")),
                    capacity.max(1) as u32,
                    device.bytes_per_frame(),
                )?)
            }
        };
        let queue = ControlQueue::allocate(config.region_config(region_name("queue")))?;

        let configuration = StreamConfiguration {
            device_id: endpoint.key().0,
            direction: request.direction,
            sample_rate: device.sample_rate,
            samples_per_frame: device.samples_per_frame,
            format: device.format,
            sharing_mode: endpoint.sharing_mode(),
            frames_per_burst: device.frames_per_burst,
            buffer_capacity: fifo.capacity() as i32,
        };
        configuration.validate_bounds()?;

        let position = PositionTracker::new(device_counter(&fifo, request.direction));
        log::debug!(
            "Opened {:?} {} stream on device {} for pid {}: {} frames, burst {}",
            configuration.sharing_mode,
            configuration.direction,
            configuration.device_id,
            owner_pid,
            configuration.buffer_capacity,
            configuration.frames_per_burst
        );

        Ok(Arc::new(Self {
            owner_pid,
            handle: AtomicI32::new(0),
            configuration,
            endpoint,
            fifo,
            queue: Mutex::new(queue),
            state: Mutex::new(StreamState::Open),
            disconnected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            device_position: Mutex::new(position),
            reported_xruns: AtomicU32::new(0),
            timestamps: Mutex::new(None),
        }))
    }

    pub fn owner_pid(&self) -> ClientPid {
        self.owner_pid
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle.load(Ordering::Relaxed)
    }

    pub(crate) fn set_handle(&self, handle: StreamHandle) {
        self.handle.store(handle, Ordering::Relaxed);
    }

    pub fn configuration(&self) -> &StreamConfiguration {
        &self.configuration
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Service view of the FIFO
    pub fn fifo(&self) -> &Arc<FifoBuffer> {
        &self.fifo
    }

    pub fn state(&self) -> StreamState {
        if self.disconnected.load(Ordering::Acquire) {
            StreamState::Disconnected
        } else {
            *self.state.lock()
        }
    }

    /// Duplicated descriptors of the FIFO and queue regions, in that order
    pub fn descriptors(&self) -> Result<(RegionDescriptor, RegionDescriptor)> {
        let data = self.fifo.region().descriptor()?;
        let queue = self.queue.lock().region().descriptor()?;
        Ok((data, queue))
    }

    fn check_connected(&self) -> Result<()> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(AudioError::disconnected(format!("Stream {} is disconnected", self.handle())));
        }
        Ok(())
    }

    fn check_open(&self, operation: &str, state: StreamState) -> Result<()> {
        self.check_connected()?;
        if state.is_closed() {
            return Err(AudioError::invalid_state(operation, state));
        }
        Ok(())
    }

    fn check_output(&self, operation: &str) -> Result<()> {
        if self.configuration.direction == Direction::Input {
            return Err(AudioError::unimplemented(format!("{} on an input stream", operation)));
        }
        Ok(())
    }

    fn send(&self, message: ControlMessage) -> Result<()> {
        let result = self.queue.lock().write(&message);
        if let Err(e) = &result {
            log::warn!("Stream {}: control queue rejected {:?}: {}", self.handle(), message, e);
        }
        result
    }

    /// Send a message; a full queue disconnects the stream
    fn send_or_disconnect(&self, message: ControlMessage) -> Result<()> {
        self.send(message).map_err(|_| {
            self.mark_disconnected("control queue full");
            AudioError::disconnected("control queue full")
        })
    }

    fn send_event(&self, kind: EventKind) -> Result<()> {
        self.send_or_disconnect(ControlMessage::event(kind))
    }

    /// The queue keeps its last slot for this event. It can only be refused
    /// when `Closed` already took that slot, which the client also reads as
    /// a disconnect.
    fn mark_disconnected(&self, reason: &str) {
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            log::error!("Stream {} disconnected: {}", self.handle(), reason);
            if let Err(e) = self.send(ControlMessage::event(EventKind::Disconnected)) {
                log::debug!("Stream {}: disconnect left to the pending close: {}", self.handle(), e);
            }
        }
    }

    /// Endpoint failure while holding the state lock
    fn fail(&self, state: &mut StreamState, operation: &str, error: AudioError) -> AudioError {
        log::error!("Stream {}: endpoint failed to {}: {}", self.handle(), operation, error);
        *state = StreamState::Disconnected;
        self.mark_disconnected(operation);
        AudioError::disconnected(format!("{} failed: {}", operation, error))
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock();
        self.check_open("start", *state)?;
        if !state.can_start() {
            return Err(AudioError::invalid_state("start", *state));
        }

        // Taken before attaching, while the device cannot move our frames.
        let origin = self.device_origin();
        if let Err(e) = self.endpoint.start_stream(&self.fifo) {
            return Err(self.fail(&mut state, "start", e));
        }
        *state = StreamState::Started;
        self.send_event(EventKind::Started)?;
        self.spawn_timestamps(origin)
    }

    fn device_origin(&self) -> DeviceOrigin {
        let position = self
            .device_position
            .lock()
            .update(&self.fifo, device_counter(&self.fifo, self.configuration.direction));
        DeviceOrigin {
            position,
            hardware: self
                .endpoint
                .hardware_timestamp(&self.fifo)
                .map_or(0, |timestamp| timestamp.position),
            xruns: self.endpoint.xrun_count(&self.fifo),
            reported_xruns: self.reported_xruns.load(Ordering::Relaxed),
        }
    }

    pub fn pause(&self) -> Result<()> {
        self.check_output("pause")?;
        let mut state = self.state.lock();
        self.check_open("pause", *state)?;
        if *state != StreamState::Started {
            return Err(AudioError::invalid_state("pause", *state));
        }

        self.stop_timestamps();
        if let Err(e) = self.endpoint.stop_stream(&self.fifo) {
            return Err(self.fail(&mut state, "pause", e));
        }
        *state = StreamState::Paused;
        self.send_event(EventKind::Paused)
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.check_open("stop", *state)?;

        if *state == StreamState::Started {
            self.stop_timestamps();
            if let Err(e) = self.endpoint.stop_stream(&self.fifo) {
                return Err(self.fail(&mut state, "stop", e));
            }
        }
        *state = StreamState::Stopped;
        self.send_event(EventKind::Stopped)
    }

    /// Drop unplayed data. A running stream is detached from the device
    /// first.
    pub fn flush(&self) -> Result<()> {
        self.check_output("flush")?;
        let mut state = self.state.lock();
        self.check_open("flush", *state)?;
        if !state.can_flush() {
            return Err(AudioError::invalid_state("flush", *state));
        }

        if *state == StreamState::Started {
            self.stop_timestamps();
            if let Err(e) = self.endpoint.stop_stream(&self.fifo) {
                return Err(self.fail(&mut state, "flush", e));
            }
        }
        let dropped = self.fifo.flush();
        log::trace!("Stream {} flushed {} frames", self.handle(), dropped);
        *state = StreamState::Flushed;
        self.send_event(EventKind::Flushed)
    }

    /// Report a new volume to the client. A client too far behind to take
    /// it gets disconnected.
    pub fn set_volume(&self, gain: f64) -> Result<()> {
        self.check_connected()?;
        self.send_or_disconnect(ControlMessage::Event {
            kind: EventKind::Volume,
            value: gain,
            data: 0,
        })
    }

    /// Release the stream. Safe to call more than once, and in any state.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        if *state == StreamState::Started {
            self.stop_timestamps();
            if let Err(e) = self.endpoint.stop_stream(&self.fifo) {
                log::warn!("Stream {}: endpoint stop failed during close: {}", self.handle(), e);
            }
        }
        *state = StreamState::Closed;
        if let Err(e) = self.send(ControlMessage::event(EventKind::Closed)) {
            log::debug!("Stream {}: close not reported to the client: {}", self.handle(), e);
        }
        log::debug!("Closed stream {} of pid {}", self.handle(), self.owner_pid);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Xruns reported to the client so far
    pub fn xrun_count(&self) -> u32 {
        self.reported_xruns.load(Ordering::Relaxed)
    }

    fn spawn_timestamps(self: &Arc<Self>, origin: DeviceOrigin) -> Result<()> {
        let (stop, stopped) = bounded::<()>(1);
        let stream = self.clone();
        let handle = thread::Builder::new()
            .name(format!("audiopipe-ts{}", self.handle()))
            .spawn(move || {
                let burst_period = stream.configuration.burst_period_nanos();
                let burst = stream.configuration.frames_per_burst as i64;
                let mut scheduler = TimestampScheduler::new(burst_period);
                let mut clock = ClockModel::new(stream.configuration.sample_rate, stream.configuration.frames_per_burst);
                let start = monotonic_nanos();
                scheduler.start(start);
                clock.start(start);

                loop {
                    let wait = (scheduler.next_absolute_time() - monotonic_nanos()).max(0);
                    match stopped.recv_timeout(Duration::from_nanos(wait as u64)) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    if !stream.timestamp_tick(&mut clock, burst, &origin) {
                        break;
                    }
                }
            })
            .map_err(|e| AudioError::no_memory_io(e, "Failed to spawn timestamp thread"))?;

        *self.timestamps.lock() = Some(TimestampWorker { stop, handle });
        Ok(())
    }

    /// One timestamp period. Returns `false` when the stream got
    /// disconnected and the loop must end.
    fn timestamp_tick(&self, clock: &mut ClockModel, burst: i64, origin: &DeviceOrigin) -> bool {
        if !self.endpoint.device().is_running() {
            self.mark_disconnected("device stopped unexpectedly");
            return false;
        }

        let now = monotonic_nanos();
        let position = self
            .device_position
            .lock()
            .update(&self.fifo, device_counter(&self.fifo, self.configuration.direction));
        clock.process_timestamp(position, now);
        let aligned = position.div_euclid(burst) * burst;
        let time = clock.convert_position_to_time(aligned).min(now);

        let mut messages = vec![ControlMessage::ServiceTimestamp(Timestamp::new(aligned, time))];
        if let Some(hardware) = self.endpoint.hardware_timestamp(&self.fifo) {
            let moved = (hardware.position - origin.hardware).max(0);
            messages.push(ControlMessage::HardwareTimestamp(Timestamp::new(
                origin.position + moved,
                hardware.nanos,
            )));
        }
        let xruns = origin
            .reported_xruns
            .saturating_add(self.endpoint.xrun_count(&self.fifo).saturating_sub(origin.xruns));
        if xruns != self.reported_xruns.swap(xruns, Ordering::Relaxed) {
            messages.push(ControlMessage::Event {
                kind: EventKind::Xrun,
                value: 0.0,
                data: xruns as i64,
            });
        }

        for message in messages {
            if self.send(message).is_err() {
                self.mark_disconnected("control queue full");
                return false;
            }
        }
        true
    }

    /// Stop and join the timestamp thread, if running
    fn stop_timestamps(&self) {
        let worker = self.timestamps.lock().take();
        if let Some(worker) = worker {
            let _ = worker.stop.try_send(());
            // The thread may drop the last reference to this stream itself.
            if worker.handle.thread().id() == thread::current().id() {
                return;
            }
            if worker.handle.join().is_err() {
                log::error!("Timestamp thread of stream {} panicked", self.handle());
            }
        }
    }
}

impl Drop for ServiceStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ServiceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceStream")
            .field("handle", &self.handle())
            .field("owner_pid", &self.owner_pid)
            .field("state", &self.state())
            .field("configuration", &self.configuration)
            .finish()
    }
}

/// Counter the device side advances: the read counter for playback, the
/// write counter for capture
fn device_counter(fifo: &FifoBuffer, direction: Direction) -> u32 {
    match direction {
        Direction::Output => fifo.read_counter(),
        Direction::Input => fifo.write_counter(),
    }
}
