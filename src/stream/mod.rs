//! Stream model shared by the client and the service
//!
//! Formats, the stream state machine, the negotiated configuration and the
//! tuning knobs that govern buffer sizing and wake-up timing.

pub mod configuration;
pub mod format;
pub mod state;
pub mod tuning;

pub use configuration::{StreamConfiguration, StreamRequest};
pub use format::{AudioFormat, Direction, PerformanceMode, Sample, SharingMode};
pub use state::StreamState;
pub use tuning::TuningConfig;
