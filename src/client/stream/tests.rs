//! Tests for the client stream controller

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::client::{
    calculate_reasonable_timeout, CallbackResult, ClientStream, LocalServiceLink, OpenedStream, ServiceLink,
    StreamBuilder,
};
use crate::clock::{monotonic_nanos, sleep_for_nanos, NANOS_PER_MILLISECOND, NANOS_PER_SECOND};
use crate::error::{AudioError, Result};
use crate::fifo::FifoBuffer;
use crate::memory::RegionConfig;
use crate::messages::{ControlMessage, ControlQueue, EventKind, RawMessage, MESSAGE_QUEUE_DEPTH};
use crate::service::{AudioService, ServiceConfig, SimulatedDeviceProvider, StreamHandle};
use crate::stream::{
    AudioFormat, Direction, SharingMode, StreamConfiguration, StreamRequest, StreamState, TuningConfig,
};

const WAIT: i64 = NANOS_PER_SECOND;

/// Service stand-in that answers every command with the matching event
struct ScriptedLink {
    configuration: StreamConfiguration,
    fifo: Mutex<Option<FifoBuffer>>,
    queue: Mutex<Option<ControlQueue>>,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedLink {
    fn new(frames_per_burst: i32, buffer_capacity: i32) -> Arc<Self> {
        Arc::new(Self {
            configuration: StreamConfiguration {
                device_id: 1,
                direction: Direction::Output,
                sample_rate: 48_000,
                samples_per_frame: 2,
                format: AudioFormat::I16,
                sharing_mode: SharingMode::Shared,
                frames_per_burst,
                buffer_capacity,
            },
            fifo: Mutex::new(None),
            queue: Mutex::new(None),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    fn reply(&self, kind: EventKind) -> Result<()> {
        match self.queue.lock().as_ref() {
            Some(queue) => queue.write(&ControlMessage::event(kind)),
            None => Err(AudioError::invalid_handle(7)),
        }
    }
}

impl ServiceLink for ScriptedLink {
    fn open_stream(&self, _request: &StreamRequest) -> Result<OpenedStream> {
        let capacity = self.configuration.buffer_capacity.max(16) as u32;
        let fifo = FifoBuffer::allocate(
            RegionConfig::new("scripted-data", 0),
            capacity,
            self.configuration.bytes_per_frame(),
        )?;
        let queue = ControlQueue::allocate(RegionConfig::new("scripted-queue", 0))?;
        let opened = OpenedStream {
            handle: 7,
            configuration: self.configuration.clone(),
            data: fifo.region().descriptor()?,
            queue: queue.region().descriptor()?,
        };
        *self.fifo.lock() = Some(fifo);
        *self.queue.lock() = Some(queue);
        Ok(opened)
    }

    fn close_stream(&self, _handle: StreamHandle) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_stream(&self, _handle: StreamHandle) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(AudioError::unavailable("device busy"));
        }
        self.reply(EventKind::Started)
    }

    fn pause_stream(&self, _handle: StreamHandle) -> Result<()> {
        self.reply(EventKind::Paused)
    }

    fn stop_stream(&self, _handle: StreamHandle) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.reply(EventKind::Stopped)
    }

    fn flush_stream(&self, _handle: StreamHandle) -> Result<()> {
        self.reply(EventKind::Flushed)
    }
}

fn open_scripted(link: &Arc<ScriptedLink>) -> ClientStream {
    ClientStream::open_with(
        link.clone(),
        &StreamRequest::default(),
        TuningConfig::default(),
        Default::default(),
    )
    .unwrap()
}

fn local_service() -> (Arc<SimulatedDeviceProvider>, Arc<AudioService>, Arc<LocalServiceLink>) {
    let provider = Arc::new(SimulatedDeviceProvider::new());
    let service = AudioService::new(provider.clone(), ServiceConfig::default()).unwrap();
    let link = LocalServiceLink::connect(service.clone(), 4242).unwrap();
    (provider, service, link)
}

fn wait_until_settled(stream: &ClientStream, pending: StreamState) -> StreamState {
    stream.wait_for_state_change(pending, WAIT).unwrap()
}

#[test]
fn test_reasonable_timeout() {
    assert_eq!(calculate_reasonable_timeout(192, 48_000), NANOS_PER_SECOND);
    // 4 x 1 s of frames
    assert_eq!(calculate_reasonable_timeout(48_000, 48_000), 4 * NANOS_PER_SECOND);
}

#[test]
fn test_open_negotiates_through_service() {
    let (_provider, service, link) = local_service();
    let stream = StreamBuilder::new()
        .buffer_capacity(480)
        .tuning(TuningConfig::default())
        .open(link)
        .unwrap();
    assert_eq!(stream.sample_rate(), 48_000);
    assert_eq!(stream.frames_per_burst(), 192);
    assert_eq!(stream.buffer_capacity(), 576);
    assert_eq!(stream.buffer_size(), 576);
    assert_eq!(stream.state(), StreamState::Open);
    assert_eq!(service.stream_count(), 1);

    stream.close().unwrap();
    assert_eq!(service.stream_count(), 0);
}

#[test]
fn test_out_of_range_burst_is_rejected_and_released() {
    let link = ScriptedLink::new(8, 576);
    let result = ClientStream::open_with(
        link.clone(),
        &StreamRequest::default(),
        TuningConfig::default(),
        Default::default(),
    );
    assert!(matches!(result, Err(AudioError::OutOfRange { .. })));
    assert_eq!(link.closes.load(Ordering::SeqCst), 1);

    let link = ScriptedLink::new(192, 40_000);
    let result = ClientStream::open_with(
        link.clone(),
        &StreamRequest::default(),
        TuningConfig::default(),
        Default::default(),
    );
    assert!(matches!(result, Err(AudioError::OutOfRange { .. })));
}

#[test]
fn test_double_start_does_not_reach_service() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);

    stream.request_start().unwrap();
    assert!(matches!(stream.request_start(), Err(AudioError::InvalidState { .. })));
    assert_eq!(wait_until_settled(&stream, StreamState::Starting), StreamState::Started);
    assert!(matches!(stream.request_start(), Err(AudioError::InvalidState { .. })));
    assert_eq!(link.starts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stop_before_start_is_invalid() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);
    assert!(matches!(stream.request_stop(), Err(AudioError::InvalidState { .. })));

    stream.request_start().unwrap();
    stream.request_stop().unwrap();
    assert_eq!(wait_until_settled(&stream, StreamState::Stopping), StreamState::Stopped);
    // Stopping again is a no-op
    stream.request_stop().unwrap();
    assert_eq!(link.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wait_for_state_change_times_out() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);
    let start = monotonic_nanos();
    assert!(matches!(
        stream.wait_for_state_change(StreamState::Open, 30 * NANOS_PER_MILLISECOND),
        Err(AudioError::Timeout { .. })
    ));
    assert!(monotonic_nanos() - start >= 30 * NANOS_PER_MILLISECOND);

    // Returns right away when the state already differs
    assert_eq!(
        stream.wait_for_state_change(StreamState::Started, 0).unwrap(),
        StreamState::Open
    );
}

#[test]
fn test_failed_request_restores_state() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);
    link.fail_start.store(true, Ordering::SeqCst);
    assert!(matches!(stream.request_start(), Err(AudioError::Unavailable { .. })));
    assert_eq!(stream.state(), StreamState::Open);

    link.fail_start.store(false, Ordering::SeqCst);
    stream.request_start().unwrap();
    assert_eq!(wait_until_settled(&stream, StreamState::Starting), StreamState::Started);
}

#[test]
fn test_zero_timeout_never_sleeps() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);
    let data = vec![0u8; 2 * 576 * 4];

    let start = monotonic_nanos();
    let written = stream.write(&data, 2 * 576, 0).unwrap();
    assert_eq!(written, 576);
    assert_eq!(stream.write(&data, 10, 0).unwrap(), 0);
    assert!(monotonic_nanos() - start < 50 * NANOS_PER_MILLISECOND);
}

#[test]
fn test_write_rejects_short_buffer_and_wrong_sample_type() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);
    assert!(matches!(
        stream.write(&[0u8; 10], 4, 0),
        Err(AudioError::IllegalArgument { .. })
    ));
    assert!(matches!(
        stream.write_samples(&[0.0f32; 8], 4, 0),
        Err(AudioError::InvalidFormat { .. })
    ));
    assert_eq!(stream.write_samples(&[0i16; 8], 4, 0).unwrap(), 4);
}

#[test]
fn test_buffer_size_rounds_to_bursts() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);
    assert_eq!(stream.set_buffer_size(200).unwrap(), 384);
    assert_eq!(stream.buffer_size(), 384);
    assert_eq!(stream.set_buffer_size(0).unwrap(), 192);

    // The threshold limits how far ahead a writer gets
    let data = vec![0u8; 576 * 4];
    assert_eq!(stream.write(&data, 576, 0).unwrap(), 192);
}

#[test]
fn test_pause_and_flush_unimplemented_for_input() {
    let (_provider, _service, link) = local_service();
    let stream = StreamBuilder::new().direction(Direction::Input).open(link).unwrap();
    stream.request_start().unwrap();
    assert!(matches!(stream.request_pause(), Err(AudioError::Unimplemented { .. })));
    assert!(matches!(stream.request_flush(), Err(AudioError::Unimplemented { .. })));
}

#[test]
fn test_blocking_write_paced_by_device() {
    let (provider, _service, link) = local_service();
    let stream = StreamBuilder::new().open(link).unwrap();
    stream.request_start().unwrap();
    assert_eq!(wait_until_settled(&stream, StreamState::Starting), StreamState::Started);

    let frames = 192 * 8;
    let data = vec![0u8; frames * 4];
    let written = stream.write(&data, frames, WAIT).unwrap();
    assert_eq!(written, frames);
    assert_eq!(stream.frames_written(), frames as i64);

    sleep_for_nanos(20 * NANOS_PER_MILLISECOND);
    assert!(stream.frames_read() > 0);
    assert!(stream.timestamp().is_ok());
    assert!(provider.instances(1, Direction::Output)[0].frames_moved() > 0);

    stream.request_stop().unwrap();
    assert_eq!(wait_until_settled(&stream, StreamState::Stopping), StreamState::Stopped);
    assert!(matches!(stream.timestamp(), Err(AudioError::InvalidState { .. })));
}

#[test]
fn test_blocking_read_from_capture_device() {
    let (_provider, _service, link) = local_service();
    let stream = StreamBuilder::new().direction(Direction::Input).open(link).unwrap();
    stream.request_start().unwrap();

    let mut samples = vec![1i16; 192 * 2 * 3];
    let read = stream.read_samples(&mut samples, 192 * 3, WAIT).unwrap();
    assert_eq!(read, 192 * 3);
    assert!(samples.iter().all(|&s| s == 0));
    assert_eq!(stream.frames_read(), 192 * 3);
}

#[test]
fn test_pause_flush_restart() {
    let (_provider, _service, link) = local_service();
    let stream = StreamBuilder::new().open(link).unwrap();
    stream.request_start().unwrap();
    wait_until_settled(&stream, StreamState::Starting);

    stream.request_pause().unwrap();
    assert_eq!(wait_until_settled(&stream, StreamState::Pausing), StreamState::Paused);

    let data = vec![0u8; 384 * 4];
    stream.write(&data, 384, 0).unwrap();
    stream.request_flush().unwrap();
    assert_eq!(wait_until_settled(&stream, StreamState::Flushing), StreamState::Flushed);
    assert_eq!(stream.frames_read(), stream.frames_written());

    stream.request_start().unwrap();
    assert_eq!(wait_until_settled(&stream, StreamState::Starting), StreamState::Started);
}

#[test]
fn test_data_callback_runs_in_fixed_blocks() {
    let (_provider, _service, link) = local_service();
    let blocks = Arc::new(AtomicUsize::new(0));
    let sizes_ok = Arc::new(AtomicBool::new(true));
    let (b, ok) = (blocks.clone(), sizes_ok.clone());

    let stream = StreamBuilder::new()
        .frames_per_callback(100)
        .sample_callback::<i16, _>(move |samples, frames| {
            if frames != 100 || samples.len() != 200 {
                ok.store(false, Ordering::SeqCst);
            }
            samples.fill(0);
            b.fetch_add(1, Ordering::SeqCst);
            CallbackResult::Continue
        })
        .open(link)
        .unwrap();

    assert!(matches!(stream.write(&[0u8; 4], 1, 0), Err(AudioError::InvalidState { .. })));
    stream.request_start().unwrap();
    sleep_for_nanos(60 * NANOS_PER_MILLISECOND);
    stream.request_stop().unwrap();
    wait_until_settled(&stream, StreamState::Stopping);

    let seen = blocks.load(Ordering::SeqCst);
    assert!(seen > 5, "only {} callbacks", seen);
    assert!(sizes_ok.load(Ordering::SeqCst));

    // The callback is reusable after a restart
    stream.request_start().unwrap();
    sleep_for_nanos(20 * NANOS_PER_MILLISECOND);
    assert!(blocks.load(Ordering::SeqCst) > seen);
}

#[test]
fn test_callback_stop_stops_stream() {
    let (_provider, _service, link) = local_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let stream = StreamBuilder::new()
        .data_callback(move |_, _| {
            if c.fetch_add(1, Ordering::SeqCst) >= 3 {
                CallbackResult::Stop
            } else {
                CallbackResult::Continue
            }
        })
        .open(link)
        .unwrap();

    stream.request_start().unwrap();
    let deadline = monotonic_nanos() + WAIT;
    while stream.state() != StreamState::Stopped && monotonic_nanos() < deadline {
        sleep_for_nanos(5 * NANOS_PER_MILLISECOND);
    }
    assert_eq!(stream.state(), StreamState::Stopped);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_device_loss_disconnects_once() {
    let (provider, _service, link) = local_service();
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    let stream = StreamBuilder::new()
        .error_callback(move |error| {
            assert!(error.is_disconnect());
            e.fetch_add(1, Ordering::SeqCst);
        })
        .open(link)
        .unwrap();
    stream.request_start().unwrap();
    wait_until_settled(&stream, StreamState::Starting);

    provider.instances(1, Direction::Output)[0].disconnect();
    let deadline = monotonic_nanos() + WAIT;
    while !stream.is_disconnected() && monotonic_nanos() < deadline {
        sleep_for_nanos(5 * NANOS_PER_MILLISECOND);
    }
    assert!(stream.is_disconnected());
    assert!(matches!(
        stream.write(&[0u8; 4], 1, 0),
        Err(AudioError::Disconnected { .. })
    ));
    assert!(matches!(stream.request_start(), Err(AudioError::Disconnected { .. })));
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    stream.close().unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
}

#[test]
fn test_client_death_disconnects_its_streams() {
    let (_provider, service, link) = local_service();
    let stream = StreamBuilder::new().open(link.clone()).unwrap();
    stream.request_start().unwrap();

    link.declare_dead();
    assert_eq!(service.stream_count(), 0);
    assert_eq!(stream.state(), StreamState::Disconnected);
}

#[test]
fn test_connection_death_spares_other_connections_of_the_process() {
    let (_provider, service, first) = local_service();
    let second = LocalServiceLink::connect(service.clone(), first.pid()).unwrap();
    let doomed = StreamBuilder::new().open(first.clone()).unwrap();
    let survivor = StreamBuilder::new().open(second).unwrap();
    assert_eq!(service.clients().connection_count(first.pid()), 2);

    first.declare_dead();
    assert_eq!(doomed.state(), StreamState::Disconnected);
    assert_eq!(service.stream_count(), 1);
    assert_eq!(survivor.state(), StreamState::Open);
    survivor.request_start().unwrap();
    assert_eq!(wait_until_settled(&survivor, StreamState::Starting), StreamState::Started);
}

#[test]
fn test_close_stops_and_is_idempotent() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);
    stream.request_start().unwrap();

    stream.close().unwrap();
    stream.close().unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(link.stops.load(Ordering::SeqCst), 1);
    assert_eq!(link.closes.load(Ordering::SeqCst), 1);
    assert!(matches!(stream.write(&[0u8; 4], 1, 0), Err(AudioError::InvalidState { .. })));

    drop(stream);
    assert_eq!(link.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_volume_and_xrun_events() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);
    assert_eq!(stream.volume(), 1.0);
    {
        let queue = link.queue.lock();
        let queue = queue.as_ref().unwrap();
        queue
            .write(&ControlMessage::Event {
                kind: EventKind::Volume,
                value: 0.25,
                data: 0,
            })
            .unwrap();
        queue
            .write(&ControlMessage::Event {
                kind: EventKind::Xrun,
                value: 0.0,
                data: 3,
            })
            .unwrap();
    }
    assert_eq!(stream.volume(), 0.25);
    assert_eq!(stream.xrun_count(), 3);
}

#[test]
fn test_unknown_record_aborts_only_that_drain() {
    let link = ScriptedLink::new(192, 576);
    let stream = open_scripted(&link);
    {
        let queue = link.queue.lock();
        let queue = queue.as_ref().unwrap();
        assert!(queue.write_raw(&RawMessage {
            what: 99,
            ..RawMessage::default()
        }));
        queue.write(&ControlMessage::event(EventKind::Started)).unwrap();
    }

    // The bad record ends the first pass before STARTED is seen
    assert_eq!(stream.state(), StreamState::Open);
    assert_eq!(stream.state(), StreamState::Started);
    assert!(!stream.is_disconnected());
}

#[test]
fn test_queue_overflow_reaches_error_callback() {
    let (provider, service, link) = local_service();
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    let stream = StreamBuilder::new()
        .error_callback(move |error| {
            assert!(error.is_disconnect());
            e.fetch_add(1, Ordering::SeqCst);
        })
        .open(link)
        .unwrap();
    stream.request_start().unwrap();
    assert_eq!(wait_until_settled(&stream, StreamState::Starting), StreamState::Started);

    // Flood the queue while the client is not draining it
    let mut sent = 0;
    while service.set_stream_volume(stream.handle(), 0.5).is_ok() {
        sent += 1;
        assert!(sent < MESSAGE_QUEUE_DEPTH, "queue never filled");
    }
    provider.instances(1, Direction::Output)[0].disconnect();

    assert_eq!(stream.state(), StreamState::Disconnected);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(matches!(
        stream.write(&[0u8; 4], 1, 0),
        Err(AudioError::Disconnected { .. })
    ));
    assert_eq!(stream.volume(), 0.5);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn test_worker_keeps_frames_the_fifo_had_no_room_for() {
    let link = ScriptedLink::new(192, 576);
    let blocks = Arc::new(AtomicUsize::new(0));
    let b = blocks.clone();
    let stream = StreamBuilder::new()
        .sample_callback::<i16, _>(move |samples, _frames| {
            let block = b.fetch_add(1, Ordering::SeqCst) as i16;
            samples.fill(block);
            CallbackResult::Continue
        })
        .open(link.clone())
        .unwrap();

    // Nothing drains the FIFO: three bursts fit, the fourth times out after
    // the worker's one second deadline and has to be retried
    stream.request_start().unwrap();
    sleep_for_nanos(1_300 * NANOS_PER_MILLISECOND);
    assert_eq!(blocks.load(Ordering::SeqCst), 4);

    let frame_values = |frames: u32| -> Vec<i16> {
        let guard = link.fifo.lock();
        let fifo = guard.as_ref().unwrap();
        let deadline = monotonic_nanos() + WAIT;
        while fifo.frames_available() < frames && monotonic_nanos() < deadline {
            sleep_for_nanos(NANOS_PER_MILLISECOND);
        }
        let mut bytes = vec![0u8; frames as usize * 4];
        assert_eq!(fifo.read(&mut bytes, frames), frames);
        bytes
            .chunks_exact(4)
            .map(|frame| i16::from_le_bytes([frame[0], frame[1]]))
            .collect()
    };

    let first = frame_values(576);
    for (block, chunk) in first.chunks(192).enumerate() {
        assert!(chunk.iter().all(|&value| value == block as i16));
    }
    // The retried burst comes next, not a fresh one
    assert!(frame_values(192).iter().all(|&value| value == 3));
}
