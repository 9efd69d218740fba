use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter.
///
/// Delay for attempt `n` is `min(max_delay, base * 2^n)` plus up to
/// `±jitter_factor` of that value.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
            attempt: 0,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            // gen_range panics on an inverted range
            jitter_factor: jitter_factor.max(0.0),
            attempt: 0,
        }
    }

    /// Delay for the current attempt; advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Delay for a given zero-based attempt without touching the counter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_delay = self.base.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp_delay.min(self.max_delay);

        let jitter_range = capped.as_secs_f64() * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
