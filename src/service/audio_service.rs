//! Service facade

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use crate::error::{AudioError, Result};
use crate::stream::StreamRequest;

use super::clients::{ClientId, ClientPid, ClientProcessTracker, DeathNotifier};
use super::config::ServiceConfig;
use super::device::DeviceProvider;
use super::endpoint::EndpointManager;
use super::handles::{StreamHandle, StreamHandleRegistry};
use super::stream::ServiceStream;

/// Owns every stream of the serving process.
///
/// Streams are reachable both by handle (registry) and by owning process
/// (tracker); closing through either path removes them from both and tears
/// the stream down once.
pub struct AudioService {
    config: ServiceConfig,
    endpoints: EndpointManager,
    streams: StreamHandleRegistry<ServiceStream>,
    clients: ClientProcessTracker,
    next_connection: AtomicU64,
    self_ref: Weak<AudioService>,
}

impl AudioService {
    pub fn new(provider: Arc<dyn DeviceProvider>, config: ServiceConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new_cyclic(|self_ref| Self {
            endpoints: EndpointManager::new(provider, config.clone()),
            config,
            streams: StreamHandleRegistry::new(),
            clients: ClientProcessTracker::new(),
            next_connection: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        }))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &EndpointManager {
        &self.endpoints
    }

    pub fn clients(&self) -> &ClientProcessTracker {
        &self.clients
    }

    /// Register a new connection of client process `pid` and watch for its
    /// death. Each connection's streams are closed when that connection
    /// dies.
    pub fn register_client(&self, pid: ClientPid, notifier: Arc<dyn DeathNotifier>) -> Result<ClientId> {
        let client = ClientId::new(pid, self.next_connection.fetch_add(1, Ordering::Relaxed));
        if self.clients.register_client(client, notifier.clone()) {
            let service = self.self_ref.clone();
            notifier.link_to_death(Box::new(move || {
                if let Some(service) = service.upgrade() {
                    service.handle_connection_death(client);
                }
            }))?;
        }
        Ok(client)
    }

    /// Close the streams a dead connection left behind
    pub fn handle_connection_death(&self, client: ClientId) {
        let handles = self.clients.streams_of_connection(client);
        log::info!("Client {} went away, closing {} stream(s)", client, handles.len());
        self.close_orphans(client.pid, handles);
        self.clients.remove_connection(client);
    }

    /// Close everything a dead client process left behind, over all of its
    /// connections
    pub fn handle_client_death(&self, pid: ClientPid) {
        let handles = self.clients.streams_of(pid);
        log::info!("Client {} died, closing {} stream(s)", pid, handles.len());
        self.close_orphans(pid, handles);
        self.clients.remove_client(pid);
    }

    fn close_orphans(&self, pid: ClientPid, handles: Vec<StreamHandle>) {
        for handle in handles {
            if let Err(e) = self.close_stream(handle) {
                log::debug!("Stream {} of dead client {} already gone: {}", handle, pid, e);
            }
        }
    }

    /// Open a stream owned by `client` and return its handle
    pub fn open_stream(&self, client: ClientId, request: &StreamRequest) -> Result<StreamHandle> {
        let stream = ServiceStream::open(request, client.pid, &self.endpoints)?;
        let handle = self.streams.add(stream.clone())?;
        stream.set_handle(handle);
        self.clients.register_client_stream(client, handle);
        log::info!("Stream {} opened for client {}", handle, client);
        Ok(handle)
    }

    pub fn stream(&self, handle: StreamHandle) -> Result<Arc<ServiceStream>> {
        self.streams.get(handle)
    }

    /// Like [`stream`](Self::stream), but only for the owning process
    pub fn stream_for(&self, pid: ClientPid, handle: StreamHandle) -> Result<Arc<ServiceStream>> {
        let stream = self.streams.get(handle)?;
        if stream.owner_pid() != pid {
            log::warn!("pid {} used stream {} owned by {}", pid, handle, stream.owner_pid());
            return Err(AudioError::invalid_handle(handle));
        }
        Ok(stream)
    }

    pub fn close_stream(&self, handle: StreamHandle) -> Result<()> {
        let stream = self
            .streams
            .remove(handle)
            .ok_or_else(|| AudioError::invalid_handle(handle))?;
        self.clients.unregister_client_stream(stream.owner_pid(), handle);
        stream.close();
        Ok(())
    }

    pub fn start_stream(&self, handle: StreamHandle) -> Result<()> {
        self.streams.get(handle)?.start()
    }

    pub fn pause_stream(&self, handle: StreamHandle) -> Result<()> {
        self.streams.get(handle)?.pause()
    }

    pub fn stop_stream(&self, handle: StreamHandle) -> Result<()> {
        self.streams.get(handle)?.stop()
    }

    pub fn flush_stream(&self, handle: StreamHandle) -> Result<()> {
        self.streams.get(handle)?.flush()
    }

    pub fn set_stream_volume(&self, handle: StreamHandle, gain: f64) -> Result<()> {
        self.streams.get(handle)?.set_volume(gain)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Close every stream
    pub fn shutdown(&self) {
        let streams = self.streams.drain();
        if !streams.is_empty() {
            log::info!("Shutting down {} stream(s)", streams.len());
        }
        for (handle, stream) in streams {
            self.clients.unregister_client_stream(stream.owner_pid(), handle);
            stream.close();
        }
    }
}

impl std::fmt::Debug for AudioService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioService")
            .field("streams", &self.stream_count())
            .field("clients", &self.clients)
            .finish()
    }
}
