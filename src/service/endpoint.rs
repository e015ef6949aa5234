//! Device endpoints
//!
//! A stream reaches its device through an [`Endpoint`]. Shared endpoints are
//! reference counted and multiplex every stream on a (device, direction)
//! pair; the device runs while at least one of those streams does. Exclusive
//! endpoints own a device instance and hand its buffer straight to a single
//! stream.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::clock::Timestamp;
use crate::config::UNSPECIFIED;
use crate::error::{AudioError, Result};
use crate::fifo::FifoBuffer;
use crate::stream::{configuration::negotiate_capacity, Direction, PerformanceMode, SharingMode, StreamRequest};

use super::config::{ExclusivePolicy, ServiceConfig};
use super::device::{AudioDevice, DeviceFormat, DeviceProvider};
use super::region_name;

/// Endpoints are keyed by device id and direction
pub type EndpointKey = (i32, Direction);

type SharedMap = Mutex<HashMap<EndpointKey, Weak<SharedEndpoint>>>;
type ExclusiveSet = Mutex<HashSet<EndpointKey>>;

/// Endpoint multiplexing several streams onto one device
pub struct SharedEndpoint {
    key: EndpointKey,
    device: Arc<dyn AudioDevice>,
    running_streams: Mutex<usize>,
    registry: Weak<SharedMap>,
}

impl SharedEndpoint {
    /// Attach a stream's FIFO, starting the device for the first one
    pub fn start_stream(&self, fifo: &Arc<FifoBuffer>) -> Result<()> {
        let mut running = self.running_streams.lock();
        self.device.attach(fifo.clone())?;
        if *running == 0 {
            if let Err(e) = self.device.start() {
                if let Err(detach_error) = self.device.detach(fifo) {
                    log::debug!("Device {} detach after failed start: {}", self.key.0, detach_error);
                }
                return Err(e);
            }
        }
        *running += 1;
        Ok(())
    }

    /// Detach a stream's FIFO, stopping the device after the last one
    pub fn stop_stream(&self, fifo: &Arc<FifoBuffer>) -> Result<()> {
        let mut running = self.running_streams.lock();
        let detached = self.device.detach(fifo);
        *running = running.saturating_sub(1);
        if *running == 0 {
            self.device.stop()?;
        }
        detached
    }

    pub fn running_streams(&self) -> usize {
        *self.running_streams.lock()
    }

    pub fn device(&self) -> &Arc<dyn AudioDevice> {
        &self.device
    }
}

impl Drop for SharedEndpoint {
    fn drop(&mut self) {
        if self.device.is_running() {
            if let Err(e) = self.device.stop() {
                log::warn!("Failed to stop device {} on release: {}", self.key.0, e);
            }
        }
        if let Some(registry) = self.registry.upgrade() {
            let mut map = registry.lock();
            // A replacement may already be registered under the same key.
            let ours = map
                .get(&self.key)
                .map_or(false, |weak| std::ptr::eq(weak.as_ptr(), self as *const SharedEndpoint));
            if ours {
                map.remove(&self.key);
            }
        }
        log::debug!("Released shared endpoint {:?}", self.key);
    }
}

/// Endpoint owning a device and its mapped buffer
pub struct ExclusiveEndpoint {
    key: EndpointKey,
    device: Arc<dyn AudioDevice>,
    fifo: Arc<FifoBuffer>,
    registry: Weak<ExclusiveSet>,
}

impl ExclusiveEndpoint {
    pub fn fifo(&self) -> &Arc<FifoBuffer> {
        &self.fifo
    }

    pub fn device(&self) -> &Arc<dyn AudioDevice> {
        &self.device
    }
}

impl Drop for ExclusiveEndpoint {
    fn drop(&mut self) {
        if self.device.is_running() {
            if let Err(e) = self.device.stop() {
                log::warn!("Failed to stop exclusive device {} on release: {}", self.key.0, e);
            }
        }
        if let Err(e) = self.device.detach(&self.fifo) {
            log::debug!("Exclusive device {} detach on release: {}", self.key.0, e);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.key);
        }
        log::debug!("Released exclusive endpoint {:?}", self.key);
    }
}

/// The device connection of one stream, chosen at open
pub enum Endpoint {
    Shared(Arc<SharedEndpoint>),
    Exclusive(ExclusiveEndpoint),
}

impl Endpoint {
    pub fn device(&self) -> &Arc<dyn AudioDevice> {
        match self {
            Endpoint::Shared(shared) => &shared.device,
            Endpoint::Exclusive(exclusive) => &exclusive.device,
        }
    }

    pub fn format(&self) -> DeviceFormat {
        self.device().format()
    }

    pub fn sharing_mode(&self) -> SharingMode {
        match self {
            Endpoint::Shared(_) => SharingMode::Shared,
            Endpoint::Exclusive(_) => SharingMode::Exclusive,
        }
    }

    pub fn key(&self) -> EndpointKey {
        match self {
            Endpoint::Shared(shared) => shared.key,
            Endpoint::Exclusive(exclusive) => exclusive.key,
        }
    }

    /// Device buffer for exclusive endpoints
    pub fn mapped_fifo(&self) -> Option<&Arc<FifoBuffer>> {
        match self {
            Endpoint::Shared(_) => None,
            Endpoint::Exclusive(exclusive) => Some(&exclusive.fifo),
        }
    }

    /// Begin moving data for a stream's FIFO
    pub fn start_stream(&self, fifo: &Arc<FifoBuffer>) -> Result<()> {
        match self {
            Endpoint::Shared(shared) => shared.start_stream(fifo),
            Endpoint::Exclusive(exclusive) => exclusive.device.start(),
        }
    }

    /// Stop moving data for a stream's FIFO
    pub fn stop_stream(&self, fifo: &Arc<FifoBuffer>) -> Result<()> {
        match self {
            Endpoint::Shared(shared) => shared.stop_stream(fifo),
            Endpoint::Exclusive(exclusive) => exclusive.device.stop(),
        }
    }

    /// Latest device report for `fifo`, counted in frames moved through it
    pub fn hardware_timestamp(&self, fifo: &Arc<FifoBuffer>) -> Option<Timestamp> {
        self.device().hardware_timestamp(fifo)
    }

    pub fn xrun_count(&self, fifo: &Arc<FifoBuffer>) -> u32 {
        self.device().xrun_count(fifo)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("key", &self.key())
            .field("sharing_mode", &self.sharing_mode())
            .finish()
    }
}

/// Hands out endpoints for stream requests
pub struct EndpointManager {
    provider: Arc<dyn DeviceProvider>,
    config: ServiceConfig,
    shared: Arc<SharedMap>,
    exclusive: Arc<ExclusiveSet>,
}

impl EndpointManager {
    pub fn new(provider: Arc<dyn DeviceProvider>, config: ServiceConfig) -> Self {
        Self {
            provider,
            config,
            shared: Arc::new(Mutex::new(HashMap::new())),
            exclusive: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Resolve an unspecified device id
    pub fn resolve_device_id(&self, request: &StreamRequest) -> i32 {
        if request.device_id == UNSPECIFIED {
            self.provider.default_device_id(request.direction)
        } else {
            request.device_id
        }
    }

    /// Endpoint for a request. Exclusive requests fall back to a shared
    /// endpoint unless the policy is `Always`.
    pub fn open_endpoint(&self, request: &StreamRequest) -> Result<Endpoint> {
        let key = (self.resolve_device_id(request), request.direction);

        if request.sharing_mode == SharingMode::Exclusive {
            let attempt = self
                .exclusive_permitted(request)
                .and_then(|_| self.open_exclusive(key, request));
            match attempt {
                Ok(endpoint) => return Ok(Endpoint::Exclusive(endpoint)),
                Err(e) if self.config.exclusive_policy == ExclusivePolicy::Always => return Err(e),
                Err(e) => log::info!("Exclusive stream on device {} unavailable, using shared: {}", key.0, e),
            }
        }

        self.open_shared(key).map(Endpoint::Shared)
    }

    fn exclusive_permitted(&self, request: &StreamRequest) -> Result<()> {
        match self.config.exclusive_policy {
            ExclusivePolicy::Never => Err(AudioError::unavailable("exclusive streams are disabled")),
            ExclusivePolicy::Auto if request.performance_mode != PerformanceMode::LowLatency => Err(
                AudioError::unavailable("exclusive streams require low-latency mode"),
            ),
            _ => Ok(()),
        }
    }

    fn open_exclusive(&self, key: EndpointKey, request: &StreamRequest) -> Result<ExclusiveEndpoint> {
        if !self.exclusive.lock().insert(key) {
            return Err(AudioError::unavailable(format!(
                "device {} is held exclusively",
                key.0
            )));
        }

        let build = || -> Result<ExclusiveEndpoint> {
            let device = self.provider.open_device(key.0, key.1)?;
            let format = device.format();
            let capacity = negotiate_capacity(request.buffer_capacity, format.frames_per_burst, &self.config.tuning);
            let fifo = device.map_exclusive_buffer(capacity as u32, self.config.region_config(region_name("mmap")))?;
            Ok(ExclusiveEndpoint {
                key,
                device,
                fifo,
                registry: Arc::downgrade(&self.exclusive),
            })
        };

        build().map_err(|e| {
            self.exclusive.lock().remove(&key);
            e
        })
    }

    fn open_shared(&self, key: EndpointKey) -> Result<Arc<SharedEndpoint>> {
        let mut map = self.shared.lock();
        if let Some(existing) = map.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let device = self.provider.open_device(key.0, key.1)?;
        let endpoint = Arc::new(SharedEndpoint {
            key,
            device,
            running_streams: Mutex::new(0),
            registry: Arc::downgrade(&self.shared),
        });
        map.insert(key, Arc::downgrade(&endpoint));
        log::debug!("Opened shared endpoint {:?}", key);
        Ok(endpoint)
    }

    /// Live shared endpoints
    pub fn shared_endpoint_count(&self) -> usize {
        self.shared
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether a device is held by an exclusive stream
    pub fn is_exclusive_held(&self, key: EndpointKey) -> bool {
        self.exclusive.lock().contains(&key)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::simulated::SimulatedDeviceProvider;

    fn manager(policy: ExclusivePolicy) -> EndpointManager {
        let provider = SimulatedDeviceProvider::new().with_unmappable_device(
            5,
            Direction::Output,
            DeviceFormat::default(),
        );
        EndpointManager::new(
            Arc::new(provider),
            ServiceConfig::default().with_exclusive_policy(policy),
        )
    }

    fn exclusive_request(device_id: i32) -> StreamRequest {
        StreamRequest {
            device_id,
            sharing_mode: SharingMode::Exclusive,
            performance_mode: PerformanceMode::LowLatency,
            ..StreamRequest::default()
        }
    }

    #[test]
    fn test_shared_endpoint_is_reused_and_released() {
        let manager = manager(ExclusivePolicy::Auto);
        let a = manager.open_endpoint(&StreamRequest::default()).unwrap();
        let b = manager.open_endpoint(&StreamRequest::default()).unwrap();
        match (&a, &b) {
            (Endpoint::Shared(a), Endpoint::Shared(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected shared endpoints"),
        }
        assert_eq!(manager.shared_endpoint_count(), 1);

        drop(a);
        assert_eq!(manager.shared_endpoint_count(), 1);
        drop(b);
        assert_eq!(manager.shared_endpoint_count(), 0);
        assert!(manager.shared.lock().is_empty());
    }

    #[test]
    fn test_exclusive_granted_once() {
        let manager = manager(ExclusivePolicy::Auto);
        let first = manager.open_endpoint(&exclusive_request(1)).unwrap();
        assert_eq!(first.sharing_mode(), SharingMode::Exclusive);
        assert!(first.mapped_fifo().is_some());
        assert!(manager.is_exclusive_held((1, Direction::Output)));

        // Busy: second request falls back
        let second = manager.open_endpoint(&exclusive_request(1)).unwrap();
        assert_eq!(second.sharing_mode(), SharingMode::Shared);

        drop(first);
        assert!(!manager.is_exclusive_held((1, Direction::Output)));
    }

    #[test]
    fn test_exclusive_fallbacks() {
        let manager = manager(ExclusivePolicy::Auto);
        let relaxed = StreamRequest {
            performance_mode: PerformanceMode::None,
            ..exclusive_request(1)
        };
        assert_eq!(manager.open_endpoint(&relaxed).unwrap().sharing_mode(), SharingMode::Shared);
        assert_eq!(
            manager.open_endpoint(&exclusive_request(5)).unwrap().sharing_mode(),
            SharingMode::Shared
        );
        assert!(!manager.is_exclusive_held((5, Direction::Output)));

        let never = self::manager(ExclusivePolicy::Never);
        assert_eq!(never.open_endpoint(&exclusive_request(1)).unwrap().sharing_mode(), SharingMode::Shared);
    }

    #[test]
    fn test_always_policy_does_not_fall_back() {
        let manager = manager(ExclusivePolicy::Always);
        assert!(matches!(
            manager.open_endpoint(&exclusive_request(5)),
            Err(AudioError::Unimplemented { .. })
        ));
    }

    #[test]
    fn test_unknown_device() {
        let manager = manager(ExclusivePolicy::Auto);
        let request = StreamRequest {
            device_id: 42,
            ..StreamRequest::default()
        };
        assert!(matches!(manager.open_endpoint(&request), Err(AudioError::Unavailable { .. })));
    }
}
