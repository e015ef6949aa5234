//! Builder for client streams

use std::sync::Arc;

use crate::error::{AudioError, Result};
use crate::stream::{AudioFormat, Direction, PerformanceMode, Sample, SharingMode, StreamRequest, TuningConfig};

use super::callback::{CallbackResult, DataCallback, ErrorCallback};
use super::fixed_block::samples_mut;
use super::link::ServiceLink;
use super::stream::{CallbackSetup, ClientStream};

/// Builder pattern for opening a [`ClientStream`]
pub struct StreamBuilder {
    request: StreamRequest,
    tuning: Option<TuningConfig>,
    frames_per_callback: usize,
    data_callback: Option<DataCallback>,
    error_callback: Option<ErrorCallback>,
}

impl Default for StreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBuilder {
    /// Create a new builder; every field starts unspecified
    pub fn new() -> Self {
        Self {
            request: StreamRequest::default(),
            tuning: None,
            frames_per_callback: 0,
            data_callback: None,
            error_callback: None,
        }
    }

    /// Set device id (0 = default device for the direction)
    pub fn device_id(mut self, device_id: i32) -> Self {
        self.request.device_id = device_id;
        self
    }

    /// Set direction
    pub fn direction(mut self, direction: Direction) -> Self {
        self.request.direction = direction;
        self
    }

    /// Set sample rate
    pub fn sample_rate(mut self, sample_rate: i32) -> Self {
        self.request.sample_rate = sample_rate;
        self
    }

    /// Set channel count
    pub fn channel_count(mut self, channels: i32) -> Self {
        self.request.samples_per_frame = channels;
        self
    }

    /// Set sample format
    pub fn format(mut self, format: AudioFormat) -> Self {
        self.request.format = format;
        self
    }

    /// Set sharing mode
    pub fn sharing_mode(mut self, mode: SharingMode) -> Self {
        self.request.sharing_mode = mode;
        self
    }

    /// Set performance mode
    pub fn performance_mode(mut self, mode: PerformanceMode) -> Self {
        self.request.performance_mode = mode;
        self
    }

    /// Set requested buffer capacity in frames
    pub fn buffer_capacity(mut self, frames: i32) -> Self {
        self.request.buffer_capacity = frames;
        self
    }

    /// Set frames per data callback (0 = one burst)
    pub fn frames_per_callback(mut self, frames: usize) -> Self {
        self.frames_per_callback = frames;
        self
    }

    /// Set the data callback. The stream then runs a worker thread while
    /// started, and blocking `read`/`write` are refused.
    pub fn data_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut [u8], usize) -> CallbackResult + Send + 'static,
    {
        self.data_callback = Some(Box::new(callback));
        self
    }

    /// Set a typed data callback. The format is set from `S`.
    pub fn sample_callback<S, F>(mut self, mut callback: F) -> Self
    where
        S: Sample,
        F: FnMut(&mut [S], usize) -> CallbackResult + Send + 'static,
    {
        self.request.format = S::FORMAT;
        self.data_callback = Some(Box::new(move |bytes: &mut [u8], frames| match samples_mut::<S>(bytes) {
            Some(samples) => callback(samples, frames),
            None => {
                log::error!("Callback block is not a whole number of {} samples", S::FORMAT);
                CallbackResult::Stop
            }
        }));
        self
    }

    /// Set the error callback, run once on disconnect
    pub fn error_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&AudioError) + Send + 'static,
    {
        self.error_callback = Some(Box::new(callback));
        self
    }

    /// Override the tuning read from the environment
    pub fn tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = Some(tuning);
        self
    }

    /// The request this builder will send
    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    /// Open the stream through `link`
    pub fn open(self, link: Arc<dyn ServiceLink>) -> Result<ClientStream> {
        if self.data_callback.is_none() && self.frames_per_callback != 0 {
            return Err(AudioError::illegal_argument(
                "frames_per_callback",
                "Frames per callback needs a data callback",
            ));
        }
        let tuning = self.tuning.unwrap_or_else(TuningConfig::from_env);
        let callbacks = CallbackSetup {
            data: self.data_callback,
            frames_per_callback: self.frames_per_callback,
            error: self.error_callback,
        };
        ClientStream::open_with(link, &self.request, tuning, callbacks)
    }
}

impl std::fmt::Debug for StreamBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuilder")
            .field("request", &self.request)
            .field("frames_per_callback", &self.frames_per_callback)
            .field("data_callback", &self.data_callback.is_some())
            .field("error_callback", &self.error_callback.is_some())
            .finish()
    }
}
