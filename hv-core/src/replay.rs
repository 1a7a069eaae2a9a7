//! Replay pacing for recorded event streams.
//!
//! File readers hand out batches as fast as the disk allows; the replay
//! clock slows them back down to the device time base so that downstream
//! consumers (frame generators, viewers) observe a live-like stream.

use std::thread;
use std::time::Duration;

/// Longest single sleep, so a stopped replay reacts promptly.
const MAX_STEP: Duration = Duration::from_millis(100);

/// Paces event batches against wall time.
///
/// Feed it the device timestamp of the last event of each batch before
/// handing the batch downstream; it sleeps the scaled device-time delta
/// since the previous batch.
#[derive(Debug)]
pub struct ReplayClock {
    speed: f64,
    max_step: Duration,
    last_batch_end: Option<u64>,
}

impl ReplayClock {
    /// Creates a clock with the given playback speed.
    ///
    /// 1.0 replays in real time, larger values fast-forward. `speed` must
    /// be positive.
    pub fn new(speed: f64) -> Self {
        assert!(speed > 0.0, "playback speed must be positive");
        Self {
            speed,
            max_step: MAX_STEP,
            last_batch_end: None,
        }
    }

    /// Overrides the per-step sleep cap.
    pub fn with_max_step(speed: f64, max_step: Duration) -> Self {
        let mut clock = Self::new(speed);
        clock.max_step = max_step;
        clock
    }

    /// Playback speed factor.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Sleeps the scaled gap between the previous batch end and
    /// `batch_end_timestamp` (us). Returns the duration actually slept.
    pub fn throttle(&mut self, batch_end_timestamp: u64) -> Duration {
        let slept = match self.last_batch_end {
            Some(last) if batch_end_timestamp > last => {
                let gap_us = (batch_end_timestamp - last) as f64 / self.speed;
                let wait = Duration::from_micros(gap_us as u64).min(self.max_step);
                thread::sleep(wait);
                wait
            }
            _ => Duration::ZERO,
        };
        self.last_batch_end = Some(batch_end_timestamp);
        slept
    }

    /// Forgets the previous batch, e.g. after a reader reset.
    pub fn reset(&mut self) {
        self.last_batch_end = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_batch_is_not_delayed() {
        let mut clock = ReplayClock::new(1.0);
        assert_eq!(clock.throttle(1_000_000), Duration::ZERO);
    }

    #[test]
    fn test_gap_is_scaled_by_speed() {
        let mut clock = ReplayClock::new(2.0);
        clock.throttle(0);
        let slept = clock.throttle(4_000);
        assert_eq!(slept, Duration::from_micros(2_000));
    }

    #[test]
    fn test_step_is_capped() {
        let mut clock = ReplayClock::with_max_step(1.0, Duration::from_millis(1));
        clock.throttle(0);
        let slept = clock.throttle(10_000_000);
        assert_eq!(slept, Duration::from_millis(1));
    }

    #[test]
    fn test_backward_jump_does_not_sleep() {
        let mut clock = ReplayClock::new(1.0);
        clock.throttle(5_000);
        assert_eq!(clock.throttle(1_000), Duration::ZERO);
    }

    #[test]
    fn test_reset_forgets_last_batch() {
        let mut clock = ReplayClock::new(1.0);
        clock.throttle(5_000);
        clock.reset();
        assert_eq!(clock.throttle(10_000_000), Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "positive")]
    fn test_zero_speed_panics() {
        ReplayClock::new(0.0);
    }
}
