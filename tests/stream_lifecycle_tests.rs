//! End-to-end stream tests against an in-process service

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use audiopipe::{
    clock::{monotonic_nanos, sleep_for_nanos, NANOS_PER_MILLISECOND, NANOS_PER_SECOND},
    service::ExclusivePolicy,
    AudioError, AudioService, CallbackResult, ClientStream, Direction, LocalServiceLink, PerformanceMode,
    ServiceConfig, SharingMode, SimulatedDeviceProvider, StreamBuilder, StreamState,
};

const WAIT: i64 = NANOS_PER_SECOND;

fn service_with(policy: ExclusivePolicy) -> (Arc<SimulatedDeviceProvider>, Arc<AudioService>) {
    let provider = Arc::new(SimulatedDeviceProvider::new());
    let config = ServiceConfig::default().with_exclusive_policy(policy);
    let service = AudioService::new(provider.clone(), config).unwrap();
    (provider, service)
}

fn settle(stream: &ClientStream, pending: StreamState) -> StreamState {
    stream.wait_for_state_change(pending, WAIT).unwrap()
}

fn exclusive_builder() -> StreamBuilder {
    StreamBuilder::new()
        .sharing_mode(SharingMode::Exclusive)
        .performance_mode(PerformanceMode::LowLatency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_output_lifecycle() {
        let (provider, service) = service_with(ExclusivePolicy::Auto);
        let link = LocalServiceLink::connect(service.clone(), 100).unwrap();
        let stream = StreamBuilder::new().open(link).unwrap();
        assert_eq!(stream.state(), StreamState::Open);
        assert_eq!(service.stream_count(), 1);

        stream.request_start().unwrap();
        assert_eq!(settle(&stream, StreamState::Starting), StreamState::Started);

        let burst = stream.frames_per_burst() as usize;
        let samples = vec![100i16; burst * 2 * 4];
        assert_eq!(stream.write_samples(&samples, burst * 4, WAIT).unwrap(), burst * 4);

        stream.request_pause().unwrap();
        assert_eq!(settle(&stream, StreamState::Pausing), StreamState::Paused);
        stream.request_flush().unwrap();
        assert_eq!(settle(&stream, StreamState::Flushing), StreamState::Flushed);

        stream.request_start().unwrap();
        assert_eq!(settle(&stream, StreamState::Starting), StreamState::Started);
        stream.request_stop().unwrap();
        assert_eq!(settle(&stream, StreamState::Stopping), StreamState::Stopped);

        stream.close().unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(service.stream_count(), 0);
        assert!(provider.instances(1, Direction::Output)[0].frames_moved() > 0);
    }

    #[test]
    fn test_shared_streams_are_mixed_on_one_device() {
        let (provider, service) = service_with(ExclusivePolicy::Auto);
        let link = LocalServiceLink::connect(service.clone(), 101).unwrap();
        let first = StreamBuilder::new().open(link.clone()).unwrap();
        let second = StreamBuilder::new().open(link).unwrap();
        assert_eq!(first.configuration().sharing_mode, SharingMode::Shared);
        assert_eq!(second.configuration().sharing_mode, SharingMode::Shared);
        assert_eq!(provider.instances(1, Direction::Output).len(), 1);

        first.request_start().unwrap();
        second.request_start().unwrap();
        settle(&first, StreamState::Starting);
        settle(&second, StreamState::Starting);

        let frames = first.frames_per_burst() as usize * 4;
        let data = vec![0u8; frames * 4];
        let writer = {
            let data = data.clone();
            thread::spawn(move || {
                let written = first.write(&data, frames, WAIT).unwrap();
                (first, written)
            })
        };
        assert_eq!(second.write(&data, frames, WAIT).unwrap(), frames);
        let (first, written) = writer.join().unwrap();
        assert_eq!(written, frames);

        sleep_for_nanos(20 * NANOS_PER_MILLISECOND);
        assert!(first.frames_read() > 0);
        assert!(second.frames_read() > 0);
    }

    #[test]
    fn test_exclusive_granted_then_falls_back() {
        let (_provider, service) = service_with(ExclusivePolicy::Auto);
        let link = LocalServiceLink::connect(service, 102).unwrap();

        let exclusive = exclusive_builder().open(link.clone()).unwrap();
        assert_eq!(exclusive.configuration().sharing_mode, SharingMode::Exclusive);

        let fallback = exclusive_builder().open(link.clone()).unwrap();
        assert_eq!(fallback.configuration().sharing_mode, SharingMode::Shared);

        exclusive.close().unwrap();
        let again = exclusive_builder().open(link).unwrap();
        assert_eq!(again.configuration().sharing_mode, SharingMode::Exclusive);
    }

    #[test]
    fn test_exclusive_stream_moves_data() {
        let (provider, service) = service_with(ExclusivePolicy::Always);
        let link = LocalServiceLink::connect(service, 103).unwrap();
        let stream = exclusive_builder().open(link).unwrap();
        stream.request_start().unwrap();
        assert_eq!(settle(&stream, StreamState::Starting), StreamState::Started);

        let frames = stream.frames_per_burst() as usize * 3;
        let data = vec![0u8; frames * 4];
        assert_eq!(stream.write(&data, frames, WAIT).unwrap(), frames);
        sleep_for_nanos(20 * NANOS_PER_MILLISECOND);
        assert!(provider.instances(1, Direction::Output)[0].frames_moved() > 0);
    }

    #[test]
    fn test_capture_callback_receives_blocks() {
        let (_provider, service) = service_with(ExclusivePolicy::Auto);
        let link = LocalServiceLink::connect(service, 104).unwrap();
        let frames_seen = Arc::new(AtomicUsize::new(0));
        let seen = frames_seen.clone();

        let stream = StreamBuilder::new()
            .direction(Direction::Input)
            .sample_callback::<i16, _>(move |samples, frames| {
                assert_eq!(samples.len(), frames * 2);
                seen.fetch_add(frames, Ordering::SeqCst);
                CallbackResult::Continue
            })
            .open(link)
            .unwrap();

        stream.request_start().unwrap();
        let deadline = monotonic_nanos() + WAIT;
        while frames_seen.load(Ordering::SeqCst) < 192 * 4 && monotonic_nanos() < deadline {
            sleep_for_nanos(5 * NANOS_PER_MILLISECOND);
        }
        stream.request_stop().unwrap();
        settle(&stream, StreamState::Stopping);
        assert!(frames_seen.load(Ordering::SeqCst) >= 192 * 4);
    }

    #[test]
    fn test_service_shutdown_disconnects_clients() {
        let (_provider, service) = service_with(ExclusivePolicy::Auto);
        let link = LocalServiceLink::connect(service.clone(), 105).unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let count = errors.clone();
        let stream = StreamBuilder::new()
            .error_callback(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .open(link)
            .unwrap();
        stream.request_start().unwrap();
        settle(&stream, StreamState::Starting);

        service.shutdown();
        assert_eq!(service.stream_count(), 0);

        let deadline = monotonic_nanos() + WAIT;
        while stream.state() != StreamState::Disconnected && monotonic_nanos() < deadline {
            let _ = stream.wait_for_state_change(StreamState::Started, 10 * NANOS_PER_MILLISECOND);
        }
        assert_eq!(stream.state(), StreamState::Disconnected);
        assert!(matches!(
            stream.write(&[0u8; 4], 1, 0),
            Err(AudioError::Disconnected { .. })
        ));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(stream.close().is_ok());
    }

    #[test]
    fn test_clients_only_see_their_own_streams() {
        let (_provider, service) = service_with(ExclusivePolicy::Auto);
        let owner = LocalServiceLink::connect(service.clone(), 106).unwrap();
        let other = LocalServiceLink::connect(service.clone(), 107).unwrap();
        let stream = StreamBuilder::new().open(owner).unwrap();

        assert!(service.stream_for(106, stream.handle()).is_ok());
        assert!(matches!(
            service.stream_for(107, stream.handle()),
            Err(AudioError::InvalidHandle { .. })
        ));

        other.declare_dead();
        assert_eq!(service.stream_count(), 1);
        assert_eq!(stream.state(), StreamState::Open);
    }
}
