//! # audiopipe - cross-process low-latency audio streams
//!
//! audiopipe moves audio frames between an application process and an
//! audio-serving process through shared memory. Each stream has a
//! lock-free frame FIFO and a control queue, both mapped into the two
//! processes; the data path never takes a lock or makes a call into the
//! service.
//!
//! ## Features
//!
//! - **Shared frame FIFOs**: memfd or file-backed regions, acquire/release counters
//! - **Clock model**: predicts device progress from service timestamps so
//!   blocking transfers sleep instead of polling
//! - **Two-sided state machine**: client requests settle only when the
//!   service confirms them through the control queue
//! - **Client death handling**: a dead client's streams are closed by the service
//! - **Transports**: in-process link or a Unix socket with descriptor passing
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐          ┌──────────────────────────────┐
//! │       Client process     │  socket  │        Service process       │
//! │  ClientStream            │◄────────►│  AudioService                │
//! │   - state machine        │ commands │   - handle registry          │
//! │   - clock model          │          │   - client tracker           │
//! │   - blocking transfer    │          │   - ServiceStream + endpoint │
//! └──────────┬───────────────┘          └──────────────┬───────────────┘
//!            │        frame FIFO (shared memory)       │
//!            ├────────────────────────────────────────►│ device
//!            │◄────────────────────────────────────────┤ timestamp thread
//!                     control queue (shared memory)
//! ```

pub mod client;
pub mod clock;
pub mod error;
pub mod fifo;
pub mod memory;
pub mod messages;
pub mod service;
pub mod stream;
pub mod sync;
pub mod transport;

// Main API re-exports
pub use client::{
    CallbackResult, ClientStream, DataCallback, ErrorCallback, LocalServiceLink, ServiceLink, StreamBuilder,
};
pub use clock::{ClockModel, Timestamp};
pub use error::{as_result_code, AudioError, Result};
pub use fifo::{FifoBuffer, PositionTracker};
pub use memory::{BackingType, RegionConfig, RegionDescriptor, SharedMemoryRegion};
pub use messages::{ControlMessage, ControlQueue, EventKind};
pub use service::{
    AudioService, ExclusivePolicy, ServiceConfig, ServiceStream, SimulatedDeviceProvider, StreamHandle,
};
pub use stream::{
    AudioFormat, Direction, PerformanceMode, SharingMode, StreamConfiguration, StreamRequest, StreamState,
    TuningConfig,
};
pub use sync::TwoSlotPublisher;
pub use transport::{ServiceListener, SocketServiceLink};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    /// Request value meaning "let the service choose"
    pub const UNSPECIFIED: i32 = 0;

    /// Smallest burst a stream may be negotiated with
    pub const FRAMES_PER_BURST_MIN: i32 = 16;

    /// Largest burst a stream may be negotiated with
    pub const FRAMES_PER_BURST_MAX: i32 = 16 * 1024;

    /// Largest buffer capacity in frames
    pub const BUFFER_CAPACITY_MAX: i32 = 32 * 1024;

    /// Longest single sleep while waiting for a state change
    pub const STATE_POLL_STEP_NANOS: i64 = 20 * crate::clock::NANOS_PER_MILLISECOND;

    /// Lower bound of `calculate_reasonable_timeout`
    pub const MIN_REASONABLE_TIMEOUT_NANOS: i64 = crate::clock::NANOS_PER_SECOND;

    /// Largest request or reply frame accepted on the socket transport
    pub const MAX_FRAME_SIZE: usize = 64 * 1024;
}
