//! Data callback worker
//!
//! When a stream has a data callback, starting it spawns a worker thread that
//! loops over blocking transfers and calls the application for each block.
//! The worker is cancelled through an atomic flag checked every iteration and
//! reports how it ended over a channel.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{AudioError, Result};
use crate::stream::Direction;

use super::fixed_block::{FixedBlockAdapter, FrameBuffer};
use super::stream::StreamCore;

/// What the data callback wants next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Continue,
    /// Stop the stream after this block
    Stop,
}

/// Called with one block of frame bytes and its frame count. Output streams
/// fill the block, input streams consume it.
pub type DataCallback = Box<dyn FnMut(&mut [u8], usize) -> CallbackResult + Send>;

/// Called once when the stream is disconnected
pub type ErrorCallback = Box<dyn FnMut(&AudioError) + Send>;

/// How a worker finished
#[derive(Debug)]
pub enum WorkerExit {
    Cancelled,
    /// The callback returned `Stop`
    StoppedByCallback,
    Failed(AudioError),
}

pub(crate) struct CallbackWorker {
    cancel: Arc<AtomicBool>,
    status: Receiver<WorkerExit>,
    handle: JoinHandle<DataCallback>,
}

impl CallbackWorker {
    pub(crate) fn spawn(core: Arc<StreamCore>, callback: DataCallback, frames_per_callback: usize) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, status) = bounded(1);
        let flag = cancel.clone();
        let handle = thread::Builder::new()
            .name(format!("audiopipe-cb{}", core.handle()))
            .spawn(move || run(core, callback, frames_per_callback, flag, tx))
            .map_err(|e| AudioError::no_memory_io(e, "Failed to spawn callback thread"))?;
        Ok(Self { cancel, status, handle })
    }

    pub(crate) fn is_current_thread(&self) -> bool {
        self.handle.thread().id() == thread::current().id()
    }

    /// Ask the worker to finish after its current iteration
    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Cancel, wait for the thread and take the callback back
    pub(crate) fn join(self) -> Option<(DataCallback, WorkerExit)> {
        self.cancel.store(true, Ordering::Release);
        match self.handle.join() {
            Ok(callback) => {
                let exit = self.status.try_recv().unwrap_or(WorkerExit::Cancelled);
                Some((callback, exit))
            }
            Err(_) => {
                log::error!("Data callback thread panicked");
                None
            }
        }
    }
}

fn run(
    core: Arc<StreamCore>,
    mut callback: DataCallback,
    frames_per_callback: usize,
    cancel: Arc<AtomicBool>,
    status: Sender<WorkerExit>,
) -> DataCallback {
    let configuration = core.configuration().clone();
    let burst = configuration.frames_per_burst as usize;
    let bytes_per_frame = configuration.bytes_per_frame();
    let block = if frames_per_callback == 0 { burst } else { frames_per_callback };
    let timeout = core.calculate_reasonable_timeout(burst as i64);

    let mut adapter = FixedBlockAdapter::new(bytes_per_frame, block);
    let mut buffer = FrameBuffer::new(burst * bytes_per_frame);
    // Output frames of the last burst the FIFO has not taken yet
    let mut unwritten = 0usize;
    log::debug!("Callback worker for stream {} running, {} frames per block", core.handle(), block);

    let exit = loop {
        if cancel.load(Ordering::Acquire) {
            break WorkerExit::Cancelled;
        }
        if !core.state().is_active() {
            break WorkerExit::Cancelled;
        }

        let outcome = match configuration.direction {
            Direction::Output => {
                let result = if unwritten == 0 {
                    unwritten = burst;
                    adapter.pull(buffer.as_bytes_mut(), |data, frames| callback(data, frames))
                } else {
                    CallbackResult::Continue
                };
                let offset = (burst - unwritten) * bytes_per_frame;
                core.transfer_write(&buffer.as_bytes()[offset..], unwritten, timeout, Some(cancel.as_ref()))
                    .map(|written| {
                        unwritten -= written;
                        if unwritten > 0 {
                            log::debug!(
                                "Stream {}: {} frames wait for room in the FIFO",
                                core.handle(),
                                unwritten
                            );
                        }
                        result
                    })
            }
            Direction::Input => core
                .transfer_read(buffer.as_bytes_mut(), burst, timeout, Some(cancel.as_ref()))
                .map(|read| adapter.push(&buffer.as_bytes()[..read * bytes_per_frame], |data, frames| callback(data, frames))),
        };

        match outcome {
            Ok(CallbackResult::Continue) => {}
            Ok(CallbackResult::Stop) => {
                if let Err(e) = core.request_stop() {
                    log::warn!("Stream {}: stop requested by callback failed: {}", core.handle(), e);
                }
                break WorkerExit::StoppedByCallback;
            }
            Err(e) => {
                log::warn!("Stream {}: callback transfer failed: {}", core.handle(), e);
                break WorkerExit::Failed(e);
            }
        }
    };

    if unwritten > 0 {
        log::debug!("Stream {}: worker ended with {} frames unwritten", core.handle(), unwritten);
    }
    if let Err(e) = status.try_send(exit) {
        log::debug!("Stream {}: worker exit not collected: {}", core.handle(), e);
    }
    callback
}
