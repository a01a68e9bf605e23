//! Retry backoff
//!
//! Maps a retry attempt count to a wait duration: doubling growth from a
//! small initial delay, capped at a maximum, with jitter so a fleet of
//! clients does not reconnect in lockstep.

use rand::Rng;
use std::time::Duration;

/// Jitter fraction applied around the computed delay.
const JITTER: f64 = 0.2;

/// Capped exponential backoff.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(120),
        }
    }
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `delay(0)` is the initial delay; each further attempt doubles it
    /// until the cap. Jitter keeps the result within `[0, max]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial.as_millis().max(1) as u64;
        let max_ms = self.max.as_millis() as u64;

        // 2^40 ms is already far past any sane cap; clamping the exponent
        // keeps the multiplication from overflowing.
        let raw = initial_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(40)))
            .min(max_ms);

        let jittered =
            raw as f64 * (1.0 + JITTER * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0));
        Duration::from_millis(jittered.clamp(0.0, max_ms as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delay_is_small() {
        let backoff = ExponentialBackoff::default();
        assert!(backoff.delay(0) <= Duration::from_millis(120));
    }

    #[test]
    fn test_never_exceeds_cap() {
        let backoff = ExponentialBackoff::default();
        for attempt in 0..200 {
            let d = backoff.delay(attempt);
            assert!(d <= Duration::from_secs(120), "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn test_large_attempts_converge_to_cap() {
        let backoff = ExponentialBackoff::default();
        // At the cap, jitter can only pull downward by JITTER.
        let floor = Duration::from_secs(120).mul_f64(1.0 - JITTER - 0.01);
        for attempt in [30, 40, 100, u32::MAX] {
            assert!(backoff.delay(attempt) >= floor);
        }
    }

    #[test]
    fn test_growth_in_expectation() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(120));
        // Doubling dominates the +/-20% jitter band, so consecutive
        // attempts below the cap are strictly ordered.
        for attempt in 0..10 {
            assert!(backoff.delay(attempt + 1) > backoff.delay(attempt));
        }
    }
}
