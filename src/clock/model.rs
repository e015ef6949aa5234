//! Isochronous clock model
//!
//! Correlates the device frame position with monotonic time so the client
//! can sleep until data will be ready instead of polling. The model keeps a
//! single marker `(position, time)` and assumes the nominal sample rate from
//! there. Timestamps that arrive earlier than predicted move the marker to
//! them; late timestamps pull it forward by at most the maximum lateness, so
//! a scheduling hiccup in the service does not drag the model backwards.

use super::{frames_to_nanos, nanos_to_frames, NANOS_PER_MICROSECOND};

/// Timestamps closer than this to the marker are ignored
const MIN_NANOS_BETWEEN_TIMESTAMPS: i64 = NANOS_PER_MICROSECOND;
/// Floor for the maximum lateness
const MIN_LATENESS_NANOS: i64 = 10 * NANOS_PER_MICROSECOND;

pub const DEFAULT_SAMPLE_RATE: i32 = 48_000;
pub const DEFAULT_FRAMES_PER_BURST: i32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    /// Started, no timestamp yet
    Starting,
    /// Data began moving; still absorbing the initial burst
    Syncing,
    Running,
}

#[derive(Debug, Clone)]
pub struct ClockModel {
    sample_rate: i32,
    frames_per_burst: i32,
    max_lateness_nanos: i64,
    marker_position: i64,
    marker_nanos: i64,
    start_nanos: i64,
    state: ClockState,
}

impl Default for ClockModel {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_FRAMES_PER_BURST)
    }
}

impl ClockModel {
    pub fn new(sample_rate: i32, frames_per_burst: i32) -> Self {
        let mut model = Self {
            sample_rate: sample_rate.max(1),
            frames_per_burst: frames_per_burst.max(1),
            max_lateness_nanos: MIN_LATENESS_NANOS,
            marker_position: 0,
            marker_nanos: 0,
            start_nanos: 0,
            state: ClockState::Stopped,
        };
        model.update_max_lateness();
        model
    }

    pub fn set_sample_rate(&mut self, sample_rate: i32) {
        self.sample_rate = sample_rate.max(1);
        self.update_max_lateness();
    }

    pub fn set_frames_per_burst(&mut self, frames_per_burst: i32) {
        self.frames_per_burst = frames_per_burst.max(1);
        self.update_max_lateness();
    }

    fn update_max_lateness(&mut self) {
        let burst_nanos = frames_to_nanos(self.frames_per_burst as i64, self.sample_rate);
        self.max_lateness_nanos = burst_nanos.max(MIN_LATENESS_NANOS);
    }

    pub fn sample_rate(&self) -> i32 {
        self.sample_rate
    }

    pub fn frames_per_burst(&self) -> i32 {
        self.frames_per_burst
    }

    pub fn max_lateness_nanos(&self) -> i64 {
        self.max_lateness_nanos
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn is_starting(&self) -> bool {
        self.state == ClockState::Starting
    }

    pub fn is_running(&self) -> bool {
        self.state == ClockState::Running
    }

    /// Current marker as `(position, nanos)`
    pub fn marker(&self) -> (i64, i64) {
        (self.marker_position, self.marker_nanos)
    }

    pub fn start(&mut self, now_nanos: i64) {
        log::trace!("clock model start at {}", now_nanos);
        self.marker_nanos = now_nanos;
        self.start_nanos = now_nanos;
        self.state = ClockState::Starting;
    }

    pub fn stop(&mut self, now_nanos: i64) {
        log::trace!("clock model stop at {}", now_nanos);
        self.marker_position = self.convert_time_to_position(now_nanos);
        self.marker_nanos = now_nanos;
        self.state = ClockState::Stopped;
    }

    fn set_marker(&mut self, position: i64, nanos: i64) {
        self.marker_position = position;
        self.marker_nanos = nanos.max(self.start_nanos);
    }

    /// Fold in a `(position, time)` observation from the service
    pub fn process_timestamp(&mut self, position: i64, nanos: i64) {
        let frames_delta = position - self.marker_position;
        let nanos_delta = nanos - self.marker_nanos;
        if self.state != ClockState::Starting && nanos_delta < MIN_NANOS_BETWEEN_TIMESTAMPS {
            return;
        }

        let expected_nanos_delta = frames_to_nanos(frames_delta, self.sample_rate);
        let lateness = nanos_delta - expected_nanos_delta;

        match self.state {
            ClockState::Stopped => {}
            ClockState::Starting => {
                self.set_marker(position, nanos);
                self.state = ClockState::Syncing;
            }
            ClockState::Syncing => {
                // The first bursts may be consumed faster than real time.
                if lateness < 0 {
                    self.set_marker(position, nanos);
                } else {
                    self.state = ClockState::Running;
                }
            }
            ClockState::Running => {
                if lateness < 0 {
                    self.set_marker(position, nanos);
                } else if lateness > self.max_lateness_nanos {
                    self.set_marker(position, nanos - self.max_lateness_nanos);
                }
            }
        }
    }

    /// Predicted time at which `position` will have been reached, quantized
    /// up to the next burst boundary
    pub fn convert_position_to_time(&self, position: i64) -> i64 {
        if self.state == ClockState::Stopped {
            return self.marker_nanos;
        }
        let burst = self.frames_per_burst as i64;
        let next_burst_position = (position + burst - 1).div_euclid(burst) * burst;
        let frames_delta = next_burst_position - self.marker_position;
        let time = self.marker_nanos + frames_to_nanos(frames_delta, self.sample_rate);
        time.max(self.start_nanos)
    }

    /// Predicted frame position at `nanos`, quantized down to a burst
    /// boundary
    pub fn convert_time_to_position(&self, nanos: i64) -> i64 {
        if self.state == ClockState::Stopped {
            return self.marker_position;
        }
        let nanos = nanos.max(self.start_nanos);
        let frames_delta = nanos_to_frames(nanos - self.marker_nanos, self.sample_rate);
        let burst = self.frames_per_burst as i64;
        (self.marker_position + frames_delta).div_euclid(burst) * burst
    }
}
