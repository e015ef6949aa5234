//! Client side of one stream
//!
//! The client maps the stream's FIFO and control queue, moves frames
//! through the FIFO without talking to the service, and learns about
//! settled state changes only by draining the control queue. Requests set
//! an optimistic `*ing` state right away; the service's event settles it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::clock::{frames_to_nanos, monotonic_nanos, sleep_for_nanos, sleep_until_nanos, ClockModel, Timestamp};
use crate::config::{MIN_REASONABLE_TIMEOUT_NANOS, STATE_POLL_STEP_NANOS};
use crate::error::{AudioError, Result};
use crate::fifo::{FifoBuffer, PositionTracker};
use crate::memory::SharedMemoryRegion;
use crate::messages::{ControlMessage, ControlQueue, EventKind};
use crate::service::StreamHandle;
use crate::stream::{
    configuration::round_buffer_size, AudioFormat, Direction, Sample, StreamConfiguration, StreamRequest,
    StreamState, TuningConfig,
};

use super::callback::{CallbackWorker, DataCallback, ErrorCallback};
use super::link::{OpenedStream, ServiceLink};

/// A timeout long enough for `frames` frames at `sample_rate` to move,
/// never less than one second
pub fn calculate_reasonable_timeout(frames: i64, sample_rate: i32) -> i64 {
    (4 * frames_to_nanos(frames.max(0), sample_rate)).max(MIN_REASONABLE_TIMEOUT_NANOS)
}

/// Callbacks a stream is opened with
#[derive(Default)]
pub(crate) struct CallbackSetup {
    pub data: Option<DataCallback>,
    /// Frames per data callback; 0 means one burst
    pub frames_per_callback: usize,
    pub error: Option<ErrorCallback>,
}

struct CoreInner {
    state: StreamState,
    queue: ControlQueue,
    clock: ClockModel,
    /// Extended write counter
    written: PositionTracker,
    /// Extended read counter
    read: PositionTracker,
    xruns: u32,
    volume: f64,
    service_timestamp: Option<Timestamp>,
    hardware_timestamp: Option<Timestamp>,
}

/// Shared state of a client stream, also held by its callback worker
pub(crate) struct StreamCore {
    link: Arc<dyn ServiceLink>,
    handle: StreamHandle,
    configuration: StreamConfiguration,
    tuning: TuningConfig,
    fifo: FifoBuffer,
    inner: Mutex<CoreInner>,
    disconnect_acked: AtomicBool,
    closed: AtomicBool,
    has_data_callback: bool,
    frames_per_callback: usize,
    data_callback: Mutex<Option<DataCallback>>,
    error_callback: Mutex<Option<ErrorCallback>>,
    worker: Mutex<Option<CallbackWorker>>,
}

impl StreamCore {
    fn open(
        link: Arc<dyn ServiceLink>,
        request: &StreamRequest,
        tuning: TuningConfig,
        callbacks: CallbackSetup,
    ) -> Result<Arc<Self>> {
        request.validate()?;
        tuning.validate()?;

        let opened = link.open_stream(request)?;
        let handle = opened.handle;
        match Self::attach(link.clone(), opened, tuning, callbacks) {
            Ok(core) => {
                log::debug!(
                    "Client opened stream {}: {} Hz, {} ch, {}, burst {}, capacity {}",
                    handle,
                    core.configuration.sample_rate,
                    core.configuration.samples_per_frame,
                    core.configuration.format,
                    core.configuration.frames_per_burst,
                    core.configuration.buffer_capacity
                );
                Ok(Arc::new(core))
            }
            Err(e) => {
                log::warn!("Stream {} rejected after open: {}", handle, e);
                if let Err(close_error) = link.close_stream(handle) {
                    log::warn!("Could not release stream {}: {}", handle, close_error);
                }
                Err(e)
            }
        }
    }

    fn attach(
        link: Arc<dyn ServiceLink>,
        opened: OpenedStream,
        tuning: TuningConfig,
        callbacks: CallbackSetup,
    ) -> Result<Self> {
        let OpenedStream {
            handle,
            configuration,
            data,
            queue,
        } = opened;
        configuration.validate_bounds()?;

        let fifo = FifoBuffer::attach(
            Arc::new(SharedMemoryRegion::map_descriptor(data)?),
            configuration.buffer_capacity as u32,
            configuration.bytes_per_frame(),
        )?;
        let queue = ControlQueue::attach(Arc::new(SharedMemoryRegion::map_descriptor(queue)?))?;

        let inner = CoreInner {
            state: StreamState::Open,
            queue,
            clock: ClockModel::new(configuration.sample_rate, configuration.frames_per_burst),
            written: PositionTracker::new(fifo.write_counter()),
            read: PositionTracker::new(fifo.read_counter()),
            xruns: 0,
            volume: 1.0,
            service_timestamp: None,
            hardware_timestamp: None,
        };

        Ok(Self {
            link,
            handle,
            configuration,
            tuning,
            fifo,
            inner: Mutex::new(inner),
            disconnect_acked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            has_data_callback: callbacks.data.is_some(),
            frames_per_callback: callbacks.frames_per_callback,
            data_callback: Mutex::new(callbacks.data),
            error_callback: Mutex::new(callbacks.error),
            worker: Mutex::new(None),
        })
    }

    pub(crate) fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub(crate) fn configuration(&self) -> &StreamConfiguration {
        &self.configuration
    }

    pub(crate) fn calculate_reasonable_timeout(&self, frames: i64) -> i64 {
        calculate_reasonable_timeout(frames, self.configuration.sample_rate)
    }

    /// Drain the queue, run `f`, then report a disconnect if one is pending.
    /// The error callback never runs under the lock.
    fn with_inner<R>(&self, f: impl FnOnce(&mut CoreInner) -> R) -> R {
        let (result, disconnected) = {
            let mut inner = self.inner.lock();
            self.drain(&mut inner);
            let result = f(&mut inner);
            (result, inner.state == StreamState::Disconnected)
        };
        if disconnected {
            self.acknowledge_disconnect("service reported a disconnect");
        }
        result
    }

    fn drain(&self, inner: &mut CoreInner) {
        loop {
            match inner.queue.read() {
                Ok(Some(message)) => self.dispatch(inner, message),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Stream {}: dropped control message: {}", self.handle, e);
                    break;
                }
            }
        }
    }

    fn dispatch(&self, inner: &mut CoreInner, message: ControlMessage) {
        match message {
            ControlMessage::Event { kind, value, data } => match kind {
                EventKind::Volume => inner.volume = value,
                EventKind::Xrun => inner.xruns = data.clamp(0, u32::MAX as i64) as u32,
                _ => {
                    if let Some(settled) = StreamState::settled_by(kind) {
                        self.settle(inner, settled);
                    }
                }
            },
            ControlMessage::ServiceTimestamp(timestamp) => {
                inner.clock.process_timestamp(timestamp.position, timestamp.nanos);
                inner.service_timestamp = Some(timestamp);
            }
            ControlMessage::HardwareTimestamp(timestamp) => inner.hardware_timestamp = Some(timestamp),
        }
    }

    fn settle(&self, inner: &mut CoreInner, settled: StreamState) {
        if inner.state == StreamState::Disconnected || inner.state.is_closed() {
            return;
        }
        // The service only closes a stream behind the client's back when the
        // stream is being torn down, e.g. after the client was declared dead.
        inner.state = if settled == StreamState::Closed {
            StreamState::Disconnected
        } else {
            settled
        };
        log::trace!("Stream {} settled in {}", self.handle, inner.state);
    }

    fn acknowledge_disconnect(&self, reason: &str) {
        if self.disconnect_acked.swap(true, Ordering::AcqRel) {
            return;
        }
        log::warn!("Stream {} disconnected: {}", self.handle, reason);
        let error = AudioError::disconnected(format!("Stream {}: {}", self.handle, reason));
        if let Some(callback) = self.error_callback.lock().as_mut() {
            callback(&error);
        }
    }

    /// Move to `Disconnected` from the client side, e.g. when the link broke
    pub(crate) fn force_disconnect(&self, reason: &str) {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_closed() {
                return;
            }
            inner.state = StreamState::Disconnected;
        }
        self.acknowledge_disconnect(reason);
    }

    fn disconnected_error(&self) -> AudioError {
        AudioError::disconnected(format!("Stream {} is disconnected", self.handle))
    }

    pub(crate) fn state(&self) -> StreamState {
        self.with_inner(|inner| inner.state)
    }

    /// Check the current state and switch to `pending`. Returns the state
    /// to restore if the service refuses.
    fn begin(&self, operation: &str, allowed: fn(StreamState) -> bool, pending: StreamState) -> Result<StreamState> {
        self.with_inner(|inner| {
            let state = inner.state;
            if state == StreamState::Disconnected {
                return Err(self.disconnected_error());
            }
            if !allowed(state) {
                return Err(AudioError::invalid_state(operation, state));
            }
            inner.state = pending;
            Ok(state)
        })
    }

    fn forward<F>(&self, operation: &str, previous: StreamState, pending: StreamState, call: F) -> Result<()>
    where
        F: FnOnce(&dyn ServiceLink, StreamHandle) -> Result<()>,
    {
        match call(self.link.as_ref(), self.handle) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("Stream {}: {} request failed: {}", self.handle, operation, e);
                if e.is_disconnect() {
                    self.force_disconnect(&format!("{} failed", operation));
                } else {
                    let mut inner = self.inner.lock();
                    if inner.state == pending {
                        inner.state = previous;
                    }
                }
                Err(e)
            }
        }
    }

    fn check_output(&self, operation: &str) -> Result<()> {
        if self.configuration.direction == Direction::Input {
            return Err(AudioError::unimplemented(format!("{} on an input stream", operation)));
        }
        Ok(())
    }

    pub(crate) fn request_start(self: &Arc<Self>) -> Result<()> {
        // Reclaim the callback from a worker that stopped on its own.
        self.stop_worker();
        let previous = self.begin("start", StreamState::can_start, StreamState::Starting)?;
        {
            let mut inner = self.inner.lock();
            inner.clock.start(monotonic_nanos());
            inner.service_timestamp = None;
            inner.hardware_timestamp = None;
        }
        self.forward("start", previous, StreamState::Starting, |link, handle| link.start_stream(handle))?;
        self.spawn_worker()
    }

    pub(crate) fn request_pause(&self) -> Result<()> {
        self.check_output("pause")?;
        let previous = self.begin("pause", StreamState::can_pause, StreamState::Pausing)?;
        self.stop_worker();
        self.forward("pause", previous, StreamState::Pausing, |link, handle| link.pause_stream(handle))?;
        self.inner.lock().clock.stop(monotonic_nanos());
        Ok(())
    }

    pub(crate) fn request_flush(&self) -> Result<()> {
        self.check_output("flush")?;
        let previous = self.begin("flush", StreamState::can_flush, StreamState::Flushing)?;
        self.stop_worker();
        self.forward("flush", previous, StreamState::Flushing, |link, handle| link.flush_stream(handle))?;
        self.inner.lock().clock.stop(monotonic_nanos());
        Ok(())
    }

    /// Stopping a stream that is already stopped (or stopping) succeeds
    /// without contacting the service.
    pub(crate) fn request_stop(&self) -> Result<()> {
        let previous = self.with_inner(|inner| match inner.state {
            StreamState::Stopped | StreamState::Stopping => Ok(None),
            StreamState::Disconnected => Err(self.disconnected_error()),
            state if state.can_stop() => {
                inner.state = StreamState::Stopping;
                Ok(Some(state))
            }
            state => Err(AudioError::invalid_state("stop", state)),
        })?;
        let previous = match previous {
            Some(previous) => previous,
            None => return Ok(()),
        };

        self.stop_worker();
        self.forward("stop", previous, StreamState::Stopping, |link, handle| link.stop_stream(handle))?;
        self.inner.lock().clock.stop(monotonic_nanos());
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>) -> Result<()> {
        if !self.has_data_callback {
            return Ok(());
        }
        let callback = match self.data_callback.lock().take() {
            Some(callback) => callback,
            None => {
                log::error!("Stream {}: data callback is still held by a worker", self.handle);
                return Err(AudioError::internal("data callback unavailable"));
            }
        };
        let worker = CallbackWorker::spawn(self.clone(), callback, self.frames_per_callback)?;
        *self.worker.lock() = Some(worker);
        Ok(())
    }

    /// Cancel and join the callback worker, taking the callback back. Called
    /// from the worker itself it only cancels; the join happens later.
    fn stop_worker(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else { return };

        if worker.is_current_thread() {
            worker.cancel();
            *self.worker.lock() = Some(worker);
            return;
        }
        if let Some((callback, exit)) = worker.join() {
            log::debug!("Stream {}: callback worker ended: {:?}", self.handle, exit);
            *self.data_callback.lock() = Some(callback);
        }
    }

    pub(crate) fn wait_for_state_change(&self, current: StreamState, timeout_nanos: i64) -> Result<StreamState> {
        let deadline = monotonic_nanos().saturating_add(timeout_nanos.max(0));
        loop {
            let state = self.state();
            if state != current {
                return Ok(state);
            }
            let now = monotonic_nanos();
            if now >= deadline {
                return Err(AudioError::timeout(timeout_nanos));
            }
            sleep_for_nanos((deadline - now).min(STATE_POLL_STEP_NANOS));
        }
    }

    fn check_frames(&self, len: usize, frames: usize) -> Result<()> {
        let needed = frames.saturating_mul(self.configuration.bytes_per_frame());
        if len < needed {
            return Err(AudioError::illegal_argument(
                "buffer",
                format!("{} bytes cannot hold {} frames", len, frames),
            ));
        }
        Ok(())
    }

    /// Blocking write of `frames` frames. Returns how many were written
    /// before the deadline.
    pub(crate) fn transfer_write(
        &self,
        data: &[u8],
        frames: usize,
        timeout_nanos: i64,
        cancel: Option<&AtomicBool>,
    ) -> Result<usize> {
        self.check_frames(data.len(), frames)?;
        let bpf = self.configuration.bytes_per_frame();
        self.transfer(frames, timeout_nanos, cancel, |fifo, done| {
            fifo.write(&data[done * bpf..frames * bpf], (frames - done) as u32)
        })
    }

    /// Blocking read of `frames` frames. Returns how many were read before
    /// the deadline.
    pub(crate) fn transfer_read(
        &self,
        data: &mut [u8],
        frames: usize,
        timeout_nanos: i64,
        cancel: Option<&AtomicBool>,
    ) -> Result<usize> {
        self.check_frames(data.len(), frames)?;
        let bpf = self.configuration.bytes_per_frame();
        self.transfer(frames, timeout_nanos, cancel, |fifo, done| {
            fifo.read(&mut data[done * bpf..frames * bpf], (frames - done) as u32)
        })
    }

    fn transfer<F>(&self, frames: usize, timeout_nanos: i64, cancel: Option<&AtomicBool>, mut step: F) -> Result<usize>
    where
        F: FnMut(&FifoBuffer, usize) -> u32,
    {
        let deadline = monotonic_nanos().saturating_add(timeout_nanos.max(0));
        let mut done = 0usize;
        loop {
            let state = self.state();
            if state == StreamState::Disconnected {
                return Err(self.disconnected_error());
            }
            if state.is_closed() {
                return Err(AudioError::invalid_state("transfer", state));
            }

            done += step(&self.fifo, done) as usize;
            if done >= frames || timeout_nanos <= 0 {
                return Ok(done);
            }
            if cancel.map_or(false, |flag| flag.load(Ordering::Acquire)) {
                return Ok(done);
            }

            let now = monotonic_nanos();
            if now >= deadline {
                log::trace!("Stream {}: transfer hit its deadline after {} of {} frames", self.handle, done, frames);
                return Ok(done);
            }
            sleep_until_nanos(self.wake_time(now, state).min(deadline));
        }
    }

    /// When the device will have made room (output) or data (input) for
    /// another burst
    fn wake_time(&self, now: i64, state: StreamState) -> i64 {
        let burst = self.configuration.frames_per_burst as i64;
        let buffer_size = self.fifo.threshold() as i64;
        let predicted = if state == StreamState::Started {
            let mut inner = self.inner.lock();
            let position = match self.configuration.direction {
                Direction::Output => inner.written.update(&self.fifo, self.fifo.write_counter()) + burst - buffer_size,
                Direction::Input => inner.read.update(&self.fifo, self.fifo.read_counter()) + burst,
            };
            inner.clock.convert_position_to_time(position)
        } else {
            now + self.configuration.burst_period_nanos()
        };

        let wake = (predicted + self.tuning.wakeup_delay_nanos).max(now + self.tuning.minimum_sleep_nanos);
        // A stale clock marker must not put the thread to sleep for longer
        // than the whole buffer takes to play.
        wake.min(now + frames_to_nanos(buffer_size, self.configuration.sample_rate))
    }

    fn set_buffer_size(&self, frames: i32) -> Result<i32> {
        if self.state() == StreamState::Disconnected {
            return Err(self.disconnected_error());
        }
        let size = round_buffer_size(
            frames,
            self.configuration.frames_per_burst,
            self.configuration.buffer_capacity,
        );
        Ok(self.fifo.set_threshold(size as u32) as i32)
    }

    fn positions(&self) -> (i64, i64) {
        let mut inner = self.inner.lock();
        let written = inner.written.update(&self.fifo, self.fifo.write_counter());
        let read = inner.read.update(&self.fifo, self.fifo.read_counter());
        (written, read)
    }

    fn timestamp(&self) -> Result<Timestamp> {
        self.with_inner(|inner| match inner.state {
            StreamState::Disconnected => Err(self.disconnected_error()),
            StreamState::Started => inner
                .hardware_timestamp
                .or(inner.service_timestamp)
                .ok_or_else(|| AudioError::unavailable("No timestamp received yet")),
            state => Err(AudioError::invalid_state("get timestamp", state)),
        })
    }

    /// Stop if needed, wait a bounded time for the stop to settle, then
    /// release the stream. Later calls do nothing.
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let state = self.state();
        if state.can_stop() || state == StreamState::Stopping {
            if let Err(e) = self.request_stop() {
                log::warn!("Stream {}: stop before close failed: {}", self.handle, e);
            }
            let timeout = self.calculate_reasonable_timeout(self.configuration.frames_per_burst as i64);
            if let Err(e) = self.wait_for_state_change(StreamState::Stopping, timeout) {
                log::warn!("Stream {} closed before its stop settled: {}", self.handle, e);
            }
        }
        self.stop_worker();

        self.inner.lock().state = StreamState::Closing;
        if let Err(e) = self.link.close_stream(self.handle) {
            log::debug!("Stream {}: service close failed: {}", self.handle, e);
        }
        self.inner.lock().state = StreamState::Closed;
        log::debug!("Client closed stream {}", self.handle);
        Ok(())
    }
}

/// Client stream controller.
///
/// Created with [`StreamBuilder`](super::StreamBuilder) or
/// [`ClientStream::open`]; closed explicitly or on drop.
pub struct ClientStream {
    core: Arc<StreamCore>,
}

impl ClientStream {
    /// Open a stream without callbacks, tuned from the environment
    pub fn open(link: Arc<dyn ServiceLink>, request: &StreamRequest) -> Result<Self> {
        Self::open_with(link, request, TuningConfig::from_env(), CallbackSetup::default())
    }

    pub(crate) fn open_with(
        link: Arc<dyn ServiceLink>,
        request: &StreamRequest,
        tuning: TuningConfig,
        callbacks: CallbackSetup,
    ) -> Result<Self> {
        Ok(Self {
            core: StreamCore::open(link, request, tuning, callbacks)?,
        })
    }

    pub fn handle(&self) -> StreamHandle {
        self.core.handle
    }

    pub fn configuration(&self) -> &StreamConfiguration {
        &self.core.configuration
    }

    pub fn direction(&self) -> Direction {
        self.core.configuration.direction
    }

    pub fn sample_rate(&self) -> i32 {
        self.core.configuration.sample_rate
    }

    pub fn channel_count(&self) -> i32 {
        self.core.configuration.samples_per_frame
    }

    pub fn format(&self) -> AudioFormat {
        self.core.configuration.format
    }

    pub fn frames_per_burst(&self) -> i32 {
        self.core.configuration.frames_per_burst
    }

    pub fn buffer_capacity(&self) -> i32 {
        self.core.configuration.buffer_capacity
    }

    /// Usable part of the buffer in frames
    pub fn buffer_size(&self) -> i32 {
        self.core.fifo.threshold() as i32
    }

    /// Limit the usable part of the buffer. The size is rounded up to whole
    /// bursts and clamped to `[burst, capacity]`; returns the size applied.
    pub fn set_buffer_size(&self, frames: i32) -> Result<i32> {
        self.core.set_buffer_size(frames)
    }

    /// Current state, after draining pending service messages
    pub fn state(&self) -> StreamState {
        self.core.state()
    }

    /// Wait until the state differs from `current`. Returns the new state,
    /// or `Timeout` if it did not change in time.
    pub fn wait_for_state_change(&self, current: StreamState, timeout_nanos: i64) -> Result<StreamState> {
        self.core.wait_for_state_change(current, timeout_nanos)
    }

    pub fn request_start(&self) -> Result<()> {
        self.core.request_start()
    }

    pub fn request_pause(&self) -> Result<()> {
        self.core.request_pause()
    }

    pub fn request_flush(&self) -> Result<()> {
        self.core.request_flush()
    }

    pub fn request_stop(&self) -> Result<()> {
        self.core.request_stop()
    }

    fn check_no_callback(&self, operation: &str) -> Result<()> {
        if self.core.has_data_callback {
            return Err(AudioError::invalid_state(
                format!("{} with a data callback", operation),
                self.state(),
            ));
        }
        Ok(())
    }

    fn check_format<S: Sample>(&self) -> Result<()> {
        if S::FORMAT != self.core.configuration.format {
            return Err(AudioError::invalid_format(S::FORMAT, self.core.configuration.format));
        }
        Ok(())
    }

    /// Write `frames` frames of raw bytes, blocking up to `timeout_nanos`.
    /// A zero timeout never sleeps.
    pub fn write(&self, data: &[u8], frames: usize, timeout_nanos: i64) -> Result<usize> {
        self.check_no_callback("write")?;
        self.core.transfer_write(data, frames, timeout_nanos, None)
    }

    /// Read `frames` frames of raw bytes, blocking up to `timeout_nanos`
    pub fn read(&self, data: &mut [u8], frames: usize, timeout_nanos: i64) -> Result<usize> {
        self.check_no_callback("read")?;
        self.core.transfer_read(data, frames, timeout_nanos, None)
    }

    /// Typed [`write`](Self::write); the sample type must match the format
    pub fn write_samples<S: Sample>(&self, samples: &[S], frames: usize, timeout_nanos: i64) -> Result<usize> {
        self.check_format::<S>()?;
        self.write(bytemuck::cast_slice(samples), frames, timeout_nanos)
    }

    /// Typed [`read`](Self::read)
    pub fn read_samples<S: Sample>(&self, samples: &mut [S], frames: usize, timeout_nanos: i64) -> Result<usize> {
        self.check_format::<S>()?;
        self.read(bytemuck::cast_slice_mut(samples), frames, timeout_nanos)
    }

    /// Total frames written into the FIFO since open
    pub fn frames_written(&self) -> i64 {
        self.core.positions().0
    }

    /// Total frames read from the FIFO since open
    pub fn frames_read(&self) -> i64 {
        self.core.positions().1
    }

    /// Underruns (output) or overruns (input) reported by the service
    pub fn xrun_count(&self) -> u32 {
        self.core.with_inner(|inner| inner.xruns)
    }

    /// Last gain reported by the service
    pub fn volume(&self) -> f64 {
        self.core.with_inner(|inner| inner.volume)
    }

    /// Latest presentation timestamp: the hardware one when the device
    /// publishes it, otherwise the service's. Only while started.
    pub fn timestamp(&self) -> Result<Timestamp> {
        self.core.timestamp()
    }

    pub fn calculate_reasonable_timeout(&self, frames: i64) -> i64 {
        self.core.calculate_reasonable_timeout(frames)
    }

    pub fn is_disconnected(&self) -> bool {
        self.state() == StreamState::Disconnected
    }

    /// Stop (bounded wait) and release the stream. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        if let Err(e) = self.core.close() {
            log::warn!("Failed to close stream {} on drop: {}", self.core.handle, e);
        }
    }
}

impl std::fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStream")
            .field("handle", &self.core.handle)
            .field("configuration", &self.core.configuration)
            .finish()
    }
}

#[cfg(test)]
mod tests;
