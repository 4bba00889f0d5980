//! Exponential backoff between retransmissions of failed exchanges.
//!
//! ```
//! use core::time::Duration;
//! use bosh_client::backoff::Backoff;
//!
//! let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(2), 2.0, 0.0);
//! assert_eq!(backoff.next_delay(), Duration::from_millis(50));
//! assert_eq!(backoff.next_delay(), Duration::from_millis(100));
//!
//! backoff.reset();
//! assert_eq!(backoff.next_delay(), Duration::from_millis(50));
//! ```

use core::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter.
///
/// Delay for attempt `n` is `min(base * factor^n, max)`, scaled by a random
/// factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff schedule.
    ///
    /// `jitter` is clamped to `[0.0, 1.0]`.
    #[must_use]
    pub const fn new(base: Duration, max: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            base,
            max,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Delay before the next retransmission; advances the attempt counter.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let exp = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let delay = self.scaled(self.base, self.factor.powi(exp)).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 {
            return delay;
        }

        let scale = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        self.scaled(delay, scale)
    }

    /// `delay * scale`, saturating at `max` when the product does not fit.
    fn scaled(&self, delay: Duration, scale: f64) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * scale).unwrap_or(self.max)
    }

    /// Forget previous failures.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Growth factor between consecutive delays.
    #[must_use]
    pub const fn factor(&self) -> f64 {
        self.factor
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    /// 100 ms base, doubling, capped at 5 s, ±10% jitter.
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5), 2.0, 0.1)
    }
}
