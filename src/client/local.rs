//! In-process service link

use std::sync::Arc;

use crate::error::Result;
use crate::service::{AudioService, ClientId, ClientPid, ProcessLifeline, StreamHandle};
use crate::stream::StreamRequest;

use super::link::{OpenedStream, ServiceLink};

/// Link to an [`AudioService`] in the same process.
///
/// Acts as one client process with the given pid; dropping the link counts
/// as that process dying.
pub struct LocalServiceLink {
    service: Arc<AudioService>,
    client: ClientId,
    lifeline: ProcessLifeline,
}

impl LocalServiceLink {
    pub fn connect(service: Arc<AudioService>, pid: ClientPid) -> Result<Arc<Self>> {
        let lifeline = ProcessLifeline::new();
        let client = service.register_client(pid, lifeline.watch())?;
        Ok(Arc::new(Self {
            service,
            client,
            lifeline,
        }))
    }

    pub fn pid(&self) -> ClientPid {
        self.client.pid
    }

    pub fn service(&self) -> &Arc<AudioService> {
        &self.service
    }

    /// Simulate the death of this client process
    pub fn declare_dead(&self) {
        self.lifeline.declare_dead();
    }
}

impl ServiceLink for LocalServiceLink {
    fn open_stream(&self, request: &StreamRequest) -> Result<OpenedStream> {
        let handle = self.service.open_stream(self.client, request)?;
        let stream = self.service.stream(handle)?;
        let (data, queue) = match stream.descriptors() {
            Ok(descriptors) => descriptors,
            Err(e) => {
                if let Err(close_error) = self.service.close_stream(handle) {
                    log::debug!("Stream {} already gone: {}", handle, close_error);
                }
                return Err(e);
            }
        };
        Ok(OpenedStream {
            handle,
            configuration: stream.configuration().clone(),
            data,
            queue,
        })
    }

    fn close_stream(&self, handle: StreamHandle) -> Result<()> {
        self.service.stream_for(self.client.pid, handle)?;
        self.service.close_stream(handle)
    }

    fn start_stream(&self, handle: StreamHandle) -> Result<()> {
        self.service.stream_for(self.client.pid, handle)?.start()
    }

    fn pause_stream(&self, handle: StreamHandle) -> Result<()> {
        self.service.stream_for(self.client.pid, handle)?.pause()
    }

    fn stop_stream(&self, handle: StreamHandle) -> Result<()> {
        self.service.stream_for(self.client.pid, handle)?.stop()
    }

    fn flush_stream(&self, handle: StreamHandle) -> Result<()> {
        self.service.stream_for(self.client.pid, handle)?.flush()
    }
}

impl std::fmt::Debug for LocalServiceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalServiceLink").field("client", &self.client).finish()
    }
}
