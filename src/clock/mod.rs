//! Timing: monotonic clock access, the stream clock model and the service
//! timestamp schedule

pub mod model;
pub mod scheduler;

pub use model::{ClockModel, ClockState};
pub use scheduler::TimestampScheduler;

use nix::time::{clock_gettime, ClockId};
use serde::{Deserialize, Serialize};

pub const NANOS_PER_MICROSECOND: i64 = 1_000;
pub const NANOS_PER_MILLISECOND: i64 = 1_000_000;
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A frame position observed at a monotonic time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub position: i64,
    pub nanos: i64,
}

impl Timestamp {
    pub fn new(position: i64, nanos: i64) -> Self {
        Self { position, nanos }
    }
}

/// Current `CLOCK_MONOTONIC` time in nanoseconds
pub fn monotonic_nanos() -> i64 {
    // CLOCK_MONOTONIC is always present on supported platforms.
    clock_gettime(ClockId::CLOCK_MONOTONIC).map_or(0, |ts| {
        ts.tv_sec() as i64 * NANOS_PER_SECOND + ts.tv_nsec() as i64
    })
}

/// Sleep until the monotonic clock reaches `deadline_nanos`
pub fn sleep_until_nanos(deadline_nanos: i64) {
    if deadline_nanos <= monotonic_nanos() {
        return;
    }
    let request = libc::timespec {
        tv_sec: (deadline_nanos / NANOS_PER_SECOND) as libc::time_t,
        tv_nsec: (deadline_nanos % NANOS_PER_SECOND) as libc::c_long,
    };
    loop {
        let rc = unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &request,
                std::ptr::null_mut(),
            )
        };
        if rc != libc::EINTR {
            if rc != 0 {
                log::warn!("clock_nanosleep failed with {}", rc);
            }
            return;
        }
    }
}

/// Sleep for a relative number of nanoseconds
pub fn sleep_for_nanos(nanos: i64) {
    if nanos > 0 {
        sleep_until_nanos(monotonic_nanos() + nanos);
    }
}

/// Nanoseconds spanned by `frames` at `sample_rate`
pub fn frames_to_nanos(frames: i64, sample_rate: i32) -> i64 {
    if sample_rate <= 0 {
        return 0;
    }
    (frames as i128 * NANOS_PER_SECOND as i128 / sample_rate as i128) as i64
}

/// Frames played in `nanos` at `sample_rate`, rounded down
pub fn nanos_to_frames(nanos: i64, sample_rate: i32) -> i64 {
    (nanos as i128 * sample_rate as i128).div_euclid(NANOS_PER_SECOND as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let a = monotonic_nanos();
        sleep_for_nanos(2 * NANOS_PER_MILLISECOND);
        let b = monotonic_nanos();
        assert!(b - a >= 2 * NANOS_PER_MILLISECOND);
    }

    #[test]
    fn test_sleep_until_past_returns_immediately() {
        let start = monotonic_nanos();
        sleep_until_nanos(start - NANOS_PER_SECOND);
        assert!(monotonic_nanos() - start < 50 * NANOS_PER_MILLISECOND);
    }

    #[test]
    fn test_frame_time_conversions() {
        assert_eq!(frames_to_nanos(48_000, 48_000), NANOS_PER_SECOND);
        assert_eq!(frames_to_nanos(192, 48_000), 4 * NANOS_PER_MILLISECOND);
        assert_eq!(nanos_to_frames(4 * NANOS_PER_MILLISECOND, 48_000), 192);
        assert_eq!(nanos_to_frames(-1, 48_000), -1);
    }
}
