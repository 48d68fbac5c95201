//! Exponential backoff with symmetric jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::ResilienceConfig;

/// Backoff schedule derived from a [`ResilienceConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_factor: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max,
            jitter_factor: jitter_factor.max(0.0),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.jitter_factor)
    }

    /// Capped delay before jitter for the given 1-based retry number.
    pub fn capped(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let multiplier = 1u32 << exponent;
        self.base
            .checked_mul(multiplier)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay for `retry` using `sample` in `[-1.0, 1.0]` as the jitter draw.
    pub fn delay_with_sample(&self, retry: u32, sample: f64) -> Duration {
        let capped = self.capped(retry).as_nanos() as f64;
        let jitter = capped * self.jitter_factor * sample.clamp(-1.0, 1.0);
        let total = (capped + jitter).max(0.0).round();
        Duration::from_nanos(total as u64)
    }

    /// Delay for `retry` with a fresh random jitter draw.
    pub fn delay(&self, retry: u32) -> Duration {
        if self.jitter_factor == 0.0 {
            return self.capped(retry);
        }
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_sample(retry, sample)
    }
}
