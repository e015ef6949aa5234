//! The audio service
//!
//! Everything that runs in the serving process: devices and endpoints, the
//! per-stream controllers, the handle registry and the client tracker, all
//! owned by one [`AudioService`].

pub mod audio_service;
pub mod clients;
pub mod config;
pub mod device;
pub mod endpoint;
pub mod handles;
pub mod simulated;
pub mod stream;

pub use audio_service::AudioService;
pub use clients::{
    ClientId, ClientPid, ClientProcessTracker, ConnectionId, DeathCallback, DeathNotifier, ProcessLifeline,
};
pub use config::{ExclusivePolicy, ServiceConfig};
pub use device::{AudioDevice, DeviceFormat, DeviceProvider};
pub use endpoint::{Endpoint, EndpointManager};
pub use handles::{StreamHandle, StreamHandleRegistry};
pub use simulated::{SimulatedDevice, SimulatedDeviceProvider};
pub use stream::ServiceStream;

use std::sync::atomic::{AtomicU32, Ordering};

static REGION_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Unique name for a new shared region
pub(crate) fn region_name(kind: &str) -> String {
    let seq = REGION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("audiopipe-{}-{}-{}", std::process::id(), seq, kind)
}
