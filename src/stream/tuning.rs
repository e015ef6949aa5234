//! Tuning knobs for buffer sizing and client wake-ups

use std::str::FromStr;

use crate::clock::NANOS_PER_MICROSECOND;
use crate::error::{AudioError, Result};

pub const ENV_DEFAULT_BURSTS: &str = "AUDIOPIPE_DEFAULT_BURSTS";
pub const ENV_MAX_CAPACITY: &str = "AUDIOPIPE_MAX_CAPACITY";
pub const ENV_WAKEUP_DELAY_USEC: &str = "AUDIOPIPE_WAKEUP_DELAY_USEC";
pub const ENV_MINIMUM_SLEEP_USEC: &str = "AUDIOPIPE_MINIMUM_SLEEP_USEC";

/// Timing and sizing parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningConfig {
    /// Bursts per buffer when the capacity is unspecified
    pub default_bursts_per_buffer: i32,
    /// Largest buffer capacity in frames
    pub max_buffer_capacity: i32,
    /// Added to every computed wake time in a blocking transfer
    pub wakeup_delay_nanos: i64,
    /// Shortest sleep a blocking transfer will take
    pub minimum_sleep_nanos: i64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            default_bursts_per_buffer: 16,
            max_buffer_capacity: crate::config::BUFFER_CAPACITY_MAX,
            wakeup_delay_nanos: 200 * NANOS_PER_MICROSECOND,
            minimum_sleep_nanos: 100 * NANOS_PER_MICROSECOND,
        }
    }
}

impl TuningConfig {
    /// Defaults overridden by any `AUDIOPIPE_*` variables that are set.
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_var::<i32, _>(&lookup, ENV_DEFAULT_BURSTS) {
            config.default_bursts_per_buffer = v;
        }
        if let Some(v) = parse_var::<i32, _>(&lookup, ENV_MAX_CAPACITY) {
            config.max_buffer_capacity = v;
        }
        if let Some(v) = parse_var::<i64, _>(&lookup, ENV_WAKEUP_DELAY_USEC) {
            config.wakeup_delay_nanos = v * NANOS_PER_MICROSECOND;
        }
        if let Some(v) = parse_var::<i64, _>(&lookup, ENV_MINIMUM_SLEEP_USEC) {
            config.minimum_sleep_nanos = v * NANOS_PER_MICROSECOND;
        }

        if let Err(e) = config.validate() {
            log::warn!("Ignoring tuning overrides: {}", e);
            return Self::default();
        }
        config
    }

    pub fn with_default_bursts(mut self, bursts: i32) -> Self {
        self.default_bursts_per_buffer = bursts;
        self
    }

    pub fn with_max_buffer_capacity(mut self, frames: i32) -> Self {
        self.max_buffer_capacity = frames;
        self
    }

    pub fn with_wakeup_delay_nanos(mut self, nanos: i64) -> Self {
        self.wakeup_delay_nanos = nanos;
        self
    }

    pub fn with_minimum_sleep_nanos(mut self, nanos: i64) -> Self {
        self.minimum_sleep_nanos = nanos;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_bursts_per_buffer < 2 {
            return Err(AudioError::out_of_range(
                "default_bursts_per_buffer",
                self.default_bursts_per_buffer as i64,
                2,
                i32::MAX as i64,
            ));
        }
        let max = crate::config::BUFFER_CAPACITY_MAX;
        let min = 2 * crate::config::FRAMES_PER_BURST_MIN;
        if !(min..=max).contains(&self.max_buffer_capacity) {
            return Err(AudioError::out_of_range(
                "max_buffer_capacity",
                self.max_buffer_capacity as i64,
                min as i64,
                max as i64,
            ));
        }
        if self.wakeup_delay_nanos < 0 || self.minimum_sleep_nanos < 0 {
            return Err(AudioError::illegal_argument(
                "tuning",
                "Wake-up delay and minimum sleep must not be negative",
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a number", key, raw);
            None
        }
    }
}
