//! Wake-up schedule for the service timestamp thread
//!
//! Timestamps are sent every burst right after start, when the client's clock
//! model needs them most, then progressively less often. Each interval gets a
//! random extra delay of up to one burst so that the samples of the device
//! position are not correlated with its own period.

use rand::{rngs::StdRng, Rng, SeedableRng};

#[derive(Debug)]
pub struct TimestampScheduler {
    burst_period_nanos: i64,
    start_nanos: i64,
    last_nanos: i64,
    jitter: bool,
    rng: StdRng,
}

impl TimestampScheduler {
    pub fn new(burst_period_nanos: i64) -> Self {
        Self {
            burst_period_nanos: burst_period_nanos.max(1),
            start_nanos: 0,
            last_nanos: 0,
            jitter: true,
            rng: StdRng::from_entropy(),
        }
    }

    /// Disable the random extra delay
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Use a fixed seed for the jitter
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn start(&mut self, now_nanos: i64) {
        self.start_nanos = now_nanos;
        self.last_nanos = now_nanos;
    }

    pub fn burst_period_nanos(&self) -> i64 {
        self.burst_period_nanos
    }

    /// Bursts to wait after `periods_elapsed` periods since start
    pub fn periods_to_delay(periods_elapsed: i64) -> i64 {
        match periods_elapsed {
            p if p < 10 => 1,
            p if p < 100 => 3,
            p if p < 1000 => 10,
            _ => 50,
        }
    }

    /// Absolute time of the next timestamp
    pub fn next_absolute_time(&mut self) -> i64 {
        let periods_elapsed = (self.last_nanos - self.start_nanos) / self.burst_period_nanos;
        let mut sleep = Self::periods_to_delay(periods_elapsed) * self.burst_period_nanos;
        if self.jitter {
            sleep += self.rng.gen_range(0..self.burst_period_nanos);
        }
        self.last_nanos += sleep;
        self.last_nanos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_slows_down() {
        let mut scheduler = TimestampScheduler::new(1_000).without_jitter();
        scheduler.start(0);

        let times: Vec<i64> = (0..12).map(|_| scheduler.next_absolute_time()).collect();
        assert_eq!(times[..10], [1_000, 2_000, 3_000, 4_000, 5_000, 6_000, 7_000, 8_000, 9_000, 10_000]);
        assert_eq!(times[10], 13_000);
        assert_eq!(times[11], 16_000);

        assert_eq!(TimestampScheduler::periods_to_delay(500), 10);
        assert_eq!(TimestampScheduler::periods_to_delay(5_000), 50);
    }

    #[test]
    fn test_jitter_stays_within_one_burst() {
        let period = 4_000_000;
        let mut scheduler = TimestampScheduler::new(period).with_seed(7);
        scheduler.start(0);
        let mut last = 0;
        for _ in 0..5 {
            let next = scheduler.next_absolute_time();
            let step = next - last;
            assert!(step >= period && step < 2 * period, "step {}", step);
            last = next;
        }
    }
}
