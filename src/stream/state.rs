//! Stream state machine

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::messages::EventKind;

/// Lifecycle state of a stream.
///
/// The `*ing` states are set optimistically when a request goes out; the
/// settled state follows when the service confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamState {
    Uninitialized,
    Open,
    Starting,
    Started,
    Pausing,
    Paused,
    Flushing,
    Flushed,
    Stopping,
    Stopped,
    Closing,
    Closed,
    Disconnected,
}

impl StreamState {
    pub fn name(self) -> &'static str {
        match self {
            StreamState::Uninitialized => "UNINITIALIZED",
            StreamState::Open => "OPEN",
            StreamState::Starting => "STARTING",
            StreamState::Started => "STARTED",
            StreamState::Pausing => "PAUSING",
            StreamState::Paused => "PAUSED",
            StreamState::Flushing => "FLUSHING",
            StreamState::Flushed => "FLUSHED",
            StreamState::Stopping => "STOPPING",
            StreamState::Stopped => "STOPPED",
            StreamState::Closing => "CLOSING",
            StreamState::Closed => "CLOSED",
            StreamState::Disconnected => "DISCONNECTED",
        }
    }

    pub fn can_start(self) -> bool {
        matches!(
            self,
            StreamState::Open | StreamState::Paused | StreamState::Flushed | StreamState::Stopped
        )
    }

    pub fn can_pause(self) -> bool {
        matches!(self, StreamState::Starting | StreamState::Started)
    }

    pub fn can_flush(self) -> bool {
        matches!(self, StreamState::Started | StreamState::Paused)
    }

    pub fn can_stop(self) -> bool {
        matches!(
            self,
            StreamState::Starting
                | StreamState::Started
                | StreamState::Pausing
                | StreamState::Paused
                | StreamState::Flushing
                | StreamState::Flushed
        )
    }

    pub fn can_close(self) -> bool {
        matches!(
            self,
            StreamState::Open
                | StreamState::Stopped
                | StreamState::Paused
                | StreamState::Flushed
                | StreamState::Disconnected
        )
    }

    /// Data may flow (or is about to)
    pub fn is_active(self) -> bool {
        matches!(self, StreamState::Starting | StreamState::Started)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, StreamState::Closing | StreamState::Closed)
    }

    /// Settled state confirmed by a service event
    pub fn settled_by(event: EventKind) -> Option<StreamState> {
        match event {
            EventKind::Started => Some(StreamState::Started),
            EventKind::Paused => Some(StreamState::Paused),
            EventKind::Stopped => Some(StreamState::Stopped),
            EventKind::Flushed => Some(StreamState::Flushed),
            EventKind::Closed => Some(StreamState::Closed),
            EventKind::Disconnected => Some(StreamState::Disconnected),
            EventKind::Volume | EventKind::Xrun => None,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
