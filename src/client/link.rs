//! The client's view of the service

use crate::error::Result;
use crate::memory::RegionDescriptor;
use crate::service::StreamHandle;
use crate::stream::{StreamConfiguration, StreamRequest};

/// Everything a client needs to run a freshly opened stream
#[derive(Debug)]
pub struct OpenedStream {
    pub handle: StreamHandle,
    pub configuration: StreamConfiguration,
    /// Frame FIFO region
    pub data: RegionDescriptor,
    /// Control queue region
    pub queue: RegionDescriptor,
}

/// Commands a client sends to the service.
///
/// Every call is synchronous; the settled state arrives later through the
/// control queue.
pub trait ServiceLink: Send + Sync {
    fn open_stream(&self, request: &StreamRequest) -> Result<OpenedStream>;

    fn close_stream(&self, handle: StreamHandle) -> Result<()>;

    fn start_stream(&self, handle: StreamHandle) -> Result<()>;

    fn pause_stream(&self, handle: StreamHandle) -> Result<()>;

    fn stop_stream(&self, handle: StreamHandle) -> Result<()>;

    fn flush_stream(&self, handle: StreamHandle) -> Result<()>;
}
