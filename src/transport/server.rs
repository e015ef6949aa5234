//! Service end of the socket transport

use std::{
    os::{
        fd::AsRawFd,
        unix::net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

use crate::error::{AudioError, Result};
use crate::service::{AudioService, ClientId, ClientPid, ProcessLifeline};

use super::frame::{recv_frame, send_frame};
use super::protocol::{Reply, Request};

/// Accepts client connections for an [`AudioService`].
///
/// Each connection is served on its own thread and registered as a client
/// connection of the process named by the socket's peer credentials. When
/// the connection ends, the service closes the streams opened through it.
pub struct ServiceListener {
    listener: UnixListener,
    path: PathBuf,
    service: Arc<AudioService>,
    shutdown: Arc<AtomicBool>,
}

impl ServiceListener {
    /// Bind to `path`, replacing a stale socket file
    pub fn bind(path: impl AsRef<Path>, service: Arc<AudioService>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            log::debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(&path).map_err(|e| AudioError::no_service_io(e, "Failed to remove stale socket"))?;
        }
        let listener =
            UnixListener::bind(&path).map_err(|e| AudioError::no_service_io(e, "Failed to bind service socket"))?;
        log::info!("Audio service listening on {}", path.display());
        Ok(Self {
            listener,
            path,
            service,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until shut down
    pub fn serve(&self) -> Result<()> {
        for connection in self.listener.incoming() {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            match connection {
                Ok(stream) => {
                    let service = self.service.clone();
                    let spawned = thread::Builder::new()
                        .name("audiopipe-conn".to_string())
                        .spawn(move || serve_connection(service, stream));
                    if let Err(e) = spawned {
                        log::error!("Failed to spawn connection thread: {}", e);
                    }
                }
                Err(e) => log::warn!("Accept failed: {}", e),
            }
        }
        Ok(())
    }

    /// Run [`serve`](Self::serve) on a background thread
    pub fn spawn(self) -> Result<ListenerHandle> {
        let path = self.path.clone();
        let shutdown = self.shutdown.clone();
        let thread = thread::Builder::new()
            .name("audiopipe-accept".to_string())
            .spawn(move || {
                if let Err(e) = self.serve() {
                    log::error!("Service listener failed: {}", e);
                }
            })
            .map_err(|e| AudioError::no_memory_io(e, "Failed to spawn listener thread"))?;
        Ok(ListenerHandle {
            path,
            shutdown,
            thread: Some(thread),
        })
    }
}

impl Drop for ServiceListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Background listener started by [`ServiceListener::spawn`]
pub struct ListenerHandle {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting connections and wait for the accept thread.
    /// Established connections keep running until their clients leave.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else { return };
        self.shutdown.store(true, Ordering::Release);
        // Wake the blocking accept.
        let _ = UnixStream::connect(&self.path);
        if thread.join().is_err() {
            log::error!("Listener thread panicked");
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn peer_pid(stream: &UnixStream) -> Result<ClientPid> {
    let credentials = getsockopt(stream, PeerCredentials)?;
    Ok(credentials.pid())
}

fn serve_connection(service: Arc<AudioService>, stream: UnixStream) {
    let pid = match peer_pid(&stream) {
        Ok(pid) => pid,
        Err(e) => {
            log::warn!("Dropping connection without peer credentials: {}", e);
            return;
        }
    };
    log::debug!("Client {} connected on fd {}", pid, stream.as_raw_fd());

    // Dropping the lifeline when the connection ends closes the streams
    // opened through it.
    let lifeline = ProcessLifeline::new();
    let client = match service.register_client(pid, lifeline.watch()) {
        Ok(client) => client,
        Err(e) => {
            log::warn!("Could not register client {}: {}", pid, e);
            return;
        }
    };

    loop {
        let request = match recv_frame::<Request>(&stream) {
            Ok(Some((request, _))) => request,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Client {}: bad request frame: {}", pid, e);
                break;
            }
        };
        if let Err(e) = dispatch(&service, client, &stream, request) {
            log::warn!("Client {}: failed to send reply: {}", client, e);
            break;
        }
    }
    log::debug!("Client {} disconnected", client);
}

fn dispatch(service: &Arc<AudioService>, client: ClientId, stream: &UnixStream, request: Request) -> Result<()> {
    log::trace!("Client {}: {:?}", client, request);
    let pid = client.pid;
    let result = match request {
        Request::OpenStream(request) => {
            return match open_stream(service, client, &request) {
                Ok((reply, fds)) => {
                    let raw = [fds.0.fd.as_raw_fd(), fds.1.fd.as_raw_fd()];
                    send_frame(stream, &reply, &raw)
                }
                Err(e) => send_frame(stream, &Reply::failure(&e), &[]),
            };
        }
        Request::CloseStream(handle) => service
            .stream_for(pid, handle)
            .and_then(|_| service.close_stream(handle)),
        Request::StartStream(handle) => service.stream_for(pid, handle).and_then(|s| s.start()),
        Request::PauseStream(handle) => service.stream_for(pid, handle).and_then(|s| s.pause()),
        Request::StopStream(handle) => service.stream_for(pid, handle).and_then(|s| s.stop()),
        Request::FlushStream(handle) => service.stream_for(pid, handle).and_then(|s| s.flush()),
    };
    let reply = match result {
        Ok(()) => Reply::Done,
        Err(e) => Reply::failure(&e),
    };
    send_frame(stream, &reply, &[])
}

type Descriptors = (crate::memory::RegionDescriptor, crate::memory::RegionDescriptor);

fn open_stream(
    service: &Arc<AudioService>,
    client: ClientId,
    request: &crate::stream::StreamRequest,
) -> Result<(Reply, Descriptors)> {
    let handle = service.open_stream(client, request)?;
    let opened = service.stream(handle).and_then(|stream| {
        let descriptors = stream.descriptors()?;
        let reply = Reply::Opened {
            handle,
            configuration: stream.configuration().clone(),
            data_size: descriptors.0.size as u64,
            queue_size: descriptors.1.size as u64,
        };
        Ok((reply, descriptors))
    });
    if opened.is_err() {
        if let Err(e) = service.close_stream(handle) {
            log::debug!("Stream {} already gone: {}", handle, e);
        }
    }
    opened
}
