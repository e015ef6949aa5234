//! Request and reply messages of the socket transport

use serde::{Deserialize, Serialize};

use crate::error::AudioError;
use crate::service::StreamHandle;
use crate::stream::{StreamConfiguration, StreamRequest};

/// Client to service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    OpenStream(StreamRequest),
    CloseStream(StreamHandle),
    StartStream(StreamHandle),
    PauseStream(StreamHandle),
    StopStream(StreamHandle),
    FlushStream(StreamHandle),
}

/// Service to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// Stream opened. The FIFO and queue descriptors travel alongside, in
    /// that order.
    Opened {
        handle: StreamHandle,
        configuration: StreamConfiguration,
        data_size: u64,
        queue_size: u64,
    },
    Done,
    Failed {
        code: i32,
        detail: String,
    },
}

impl Reply {
    pub fn failure(error: &AudioError) -> Self {
        let detail = match error {
            AudioError::InvalidHandle { handle } => handle.to_string(),
            other => other.to_string(),
        };
        Reply::Failed {
            code: error.code(),
            detail,
        }
    }

    /// Turn a `Failed` reply back into an error
    pub fn into_error(self) -> Option<AudioError> {
        match self {
            Reply::Failed { code, detail } => Some(AudioError::from_code(code, &detail)),
            _ => None,
        }
    }
}
