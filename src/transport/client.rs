//! Client end of the socket transport

use std::{
    os::unix::net::UnixStream,
    path::Path,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::client::{OpenedStream, ServiceLink};
use crate::error::{AudioError, Result};
use crate::memory::RegionDescriptor;
use crate::service::StreamHandle;
use crate::stream::StreamRequest;

use super::frame::{recv_frame, send_frame};
use super::protocol::{Reply, Request};

/// [`ServiceLink`] over a Unix-domain socket.
///
/// Calls are serialized on the one connection. Losing the connection makes
/// every later call fail with `NoService`, which streams treat as a
/// disconnect.
pub struct SocketServiceLink {
    stream: Mutex<UnixStream>,
}

impl SocketServiceLink {
    pub fn connect(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| {
            AudioError::no_service_io(e, &format!("Failed to connect to {}", path.display()))
        })?;
        log::debug!("Connected to audio service at {}", path.display());
        Ok(Arc::new(Self {
            stream: Mutex::new(stream),
        }))
    }

    fn call(&self, request: &Request) -> Result<(Reply, Vec<std::os::fd::OwnedFd>)> {
        let stream = self.stream.lock();
        send_frame(&stream, request, &[]).map_err(lost)?;
        match recv_frame::<Reply>(&stream).map_err(lost)? {
            Some((reply, fds)) => match reply {
                Reply::Failed { .. } => Err(reply.into_error().unwrap_or_else(|| AudioError::internal("bad reply"))),
                reply => Ok((reply, fds)),
            },
            None => Err(AudioError::no_service("Service closed the connection")),
        }
    }

    fn command(&self, request: Request) -> Result<()> {
        match self.call(&request)?.0 {
            Reply::Done => Ok(()),
            other => Err(AudioError::internal(format!("Unexpected reply {:?}", other))),
        }
    }
}

/// Transport failures mean the service is gone
fn lost(error: AudioError) -> AudioError {
    match error {
        AudioError::NoService { .. } => error,
        other => AudioError::no_service(format!("Transport failed: {}", other)),
    }
}

impl ServiceLink for SocketServiceLink {
    fn open_stream(&self, request: &StreamRequest) -> Result<OpenedStream> {
        let (reply, fds) = self.call(&Request::OpenStream(request.clone()))?;
        let (handle, configuration, data_size, queue_size) = match reply {
            Reply::Opened {
                handle,
                configuration,
                data_size,
                queue_size,
            } => (handle, configuration, data_size, queue_size),
            other => return Err(AudioError::internal(format!("Unexpected reply {:?}", other))),
        };

        let mut fds = fds.into_iter();
        match (fds.next(), fds.next()) {
            (Some(data), Some(queue)) => Ok(OpenedStream {
                handle,
                configuration,
                data: RegionDescriptor::new(data, data_size as usize),
                queue: RegionDescriptor::new(queue, queue_size as usize),
            }),
            _ => {
                if let Err(e) = self.command(Request::CloseStream(handle)) {
                    log::debug!("Could not release stream {} after a bad open reply: {}", handle, e);
                }
                Err(AudioError::internal("Open reply arrived without region descriptors"))
            }
        }
    }

    fn close_stream(&self, handle: StreamHandle) -> Result<()> {
        self.command(Request::CloseStream(handle))
    }

    fn start_stream(&self, handle: StreamHandle) -> Result<()> {
        self.command(Request::StartStream(handle))
    }

    fn pause_stream(&self, handle: StreamHandle) -> Result<()> {
        self.command(Request::PauseStream(handle))
    }

    fn stop_stream(&self, handle: StreamHandle) -> Result<()> {
        self.command(Request::StopStream(handle))
    }

    fn flush_stream(&self, handle: StreamHandle) -> Result<()> {
        self.command(Request::FlushStream(handle))
    }
}

impl std::fmt::Debug for SocketServiceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketServiceLink").finish()
    }
}
