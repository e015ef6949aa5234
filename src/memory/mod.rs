//! Shared memory regions that back the audio FIFOs and control queues

pub mod config;
pub mod regions;

pub use config::{BackingType, RegionConfig};
pub use regions::{RegionDescriptor, SharedMemoryRegion};
