//! Requested and negotiated stream configuration

use serde::{Deserialize, Serialize};

use crate::clock::frames_to_nanos;
use crate::config::{BUFFER_CAPACITY_MAX, FRAMES_PER_BURST_MAX, FRAMES_PER_BURST_MIN, UNSPECIFIED};
use crate::error::{AudioError, Result};

use super::format::{AudioFormat, Direction, PerformanceMode, SharingMode};
use super::tuning::TuningConfig;

/// What the application asks for. Zero / `Unspecified` fields are filled in
/// by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub device_id: i32,
    pub direction: Direction,
    pub sample_rate: i32,
    pub samples_per_frame: i32,
    pub format: AudioFormat,
    pub sharing_mode: SharingMode,
    pub performance_mode: PerformanceMode,
    pub buffer_capacity: i32,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            device_id: UNSPECIFIED,
            direction: Direction::Output,
            sample_rate: UNSPECIFIED,
            samples_per_frame: UNSPECIFIED,
            format: AudioFormat::Unspecified,
            sharing_mode: SharingMode::Shared,
            performance_mode: PerformanceMode::None,
            buffer_capacity: UNSPECIFIED,
        }
    }
}

impl StreamRequest {
    /// Reject values no service could satisfy
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 0 {
            return Err(AudioError::illegal_argument("sample_rate", "Sample rate must not be negative"));
        }
        if self.samples_per_frame < 0 {
            return Err(AudioError::illegal_argument(
                "samples_per_frame",
                "Channel count must not be negative",
            ));
        }
        if self.buffer_capacity < 0 {
            return Err(AudioError::illegal_argument(
                "buffer_capacity",
                "Buffer capacity must not be negative",
            ));
        }
        Ok(())
    }
}

/// The configuration a stream actually runs with. Immutable after open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    pub device_id: i32,
    pub direction: Direction,
    pub sample_rate: i32,
    pub samples_per_frame: i32,
    pub format: AudioFormat,
    pub sharing_mode: SharingMode,
    pub frames_per_burst: i32,
    pub buffer_capacity: i32,
}

impl StreamConfiguration {
    pub fn bytes_per_frame(&self) -> usize {
        self.samples_per_frame.max(0) as usize * self.format.bytes_per_sample()
    }

    pub fn burst_period_nanos(&self) -> i64 {
        frames_to_nanos(self.frames_per_burst as i64, self.sample_rate)
    }

    /// Bounds every client checks before mapping the regions
    pub fn validate_bounds(&self) -> Result<()> {
        if !(FRAMES_PER_BURST_MIN..=FRAMES_PER_BURST_MAX).contains(&self.frames_per_burst) {
            return Err(AudioError::out_of_range(
                "frames_per_burst",
                self.frames_per_burst as i64,
                FRAMES_PER_BURST_MIN as i64,
                FRAMES_PER_BURST_MAX as i64,
            ));
        }
        if !(self.frames_per_burst..=BUFFER_CAPACITY_MAX).contains(&self.buffer_capacity) {
            return Err(AudioError::out_of_range(
                "buffer_capacity",
                self.buffer_capacity as i64,
                self.frames_per_burst as i64,
                BUFFER_CAPACITY_MAX as i64,
            ));
        }
        if self.sample_rate <= 0 {
            return Err(AudioError::illegal_argument("sample_rate", "Sample rate must be positive"));
        }
        if self.samples_per_frame <= 0 {
            return Err(AudioError::illegal_argument(
                "samples_per_frame",
                "Channel count must be positive",
            ));
        }
        if !self.format.is_specified() {
            return Err(AudioError::illegal_argument("format", "Format must be specified"));
        }
        Ok(())
    }
}

/// Buffer capacity for a new stream.
///
/// A requested size rounds up to whole bursts, at least two. Unspecified
/// means the default burst count. Either way the result never exceeds the
/// configured maximum.
pub fn negotiate_capacity(requested: i32, frames_per_burst: i32, tuning: &TuningConfig) -> i32 {
    let burst = frames_per_burst.max(1);
    let max_bursts = (tuning.max_buffer_capacity / burst).max(1);

    let bursts = if requested > 0 {
        let wanted = (requested as i64 + burst as i64 - 1) / burst as i64;
        (wanted.min(i32::MAX as i64) as i32).clamp(2, max_bursts.max(2))
    } else {
        tuning.default_bursts_per_buffer
    };
    bursts.min(max_bursts) * burst
}

/// Usable buffer size for `set_buffer_size`: whole bursts within
/// `[burst, capacity]`
pub fn round_buffer_size(requested: i32, frames_per_burst: i32, capacity: i32) -> i32 {
    let burst = frames_per_burst.max(1);
    let requested = requested.max(0) as i64;
    let rounded = (requested + burst as i64 - 1) / burst as i64 * burst as i64;
    (rounded.min(capacity as i64) as i32).max(burst).min(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration(burst: i32, capacity: i32) -> StreamConfiguration {
        StreamConfiguration {
            device_id: 1,
            direction: Direction::Output,
            sample_rate: 48_000,
            samples_per_frame: 2,
            format: AudioFormat::I16,
            sharing_mode: SharingMode::Shared,
            frames_per_burst: burst,
            buffer_capacity: capacity,
        }
    }

    #[test]
    fn test_requested_capacity_rounds_to_bursts() {
        let tuning = TuningConfig::default();
        assert_eq!(negotiate_capacity(480, 192, &tuning), 576);
        assert_eq!(negotiate_capacity(1, 192, &tuning), 384);
        assert_eq!(negotiate_capacity(1_000_000, 192, &tuning), 32_640);
    }

    #[test]
    fn test_unspecified_capacity_uses_default_bursts() {
        let tuning = TuningConfig::default();
        assert_eq!(negotiate_capacity(UNSPECIFIED, 192, &tuning), 16 * 192);
        // 16 bursts of 4096 would exceed the cap
        assert_eq!(negotiate_capacity(UNSPECIFIED, 4096, &tuning), 32_768);
        assert_eq!(negotiate_capacity(UNSPECIFIED, 3000, &tuning), 30_000);
    }

    #[test]
    fn test_buffer_size_rounding() {
        assert_eq!(round_buffer_size(200, 192, 576), 384);
        assert_eq!(round_buffer_size(0, 192, 576), 192);
        assert_eq!(round_buffer_size(10_000, 192, 576), 576);
    }

    #[test]
    fn test_bounds() {
        assert!(configuration(192, 576).validate_bounds().is_ok());
        assert!(matches!(
            configuration(8, 576).validate_bounds(),
            Err(AudioError::OutOfRange { .. })
        ));
        assert!(matches!(
            configuration(32_768, 32_768).validate_bounds(),
            Err(AudioError::OutOfRange { .. })
        ));
        assert!(matches!(
            configuration(192, 100).validate_bounds(),
            Err(AudioError::OutOfRange { .. })
        ));
        assert!(matches!(
            configuration(192, 40_000).validate_bounds(),
            Err(AudioError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_configuration_round_trips_through_bincode() {
        let config = configuration(192, 576);
        let bytes = bincode::serialize(&config).unwrap();
        let back: StreamConfiguration = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.bytes_per_frame(), 4);
        assert_eq!(back.burst_period_nanos(), 4_000_000);
    }
}
