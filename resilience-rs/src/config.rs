//! Resilience policy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ErrorKind;

/// Configuration error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("base_delay_ms ({base}) must not exceed max_delay_ms ({max})")]
    DelayRange { base: u64, max: u64 },

    #[error("circuit_breaker_failure_threshold must be at least 1")]
    ZeroThreshold,

    #[error("timeout_per_attempt_ms must be greater than zero")]
    ZeroTimeout,

    #[error("jitter_factor must be a finite, non-negative number (got {0})")]
    InvalidJitter(f64),
}

/// Immutable policy settings, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff
    pub max_delay_ms: u64,
    /// Deadline for each individual attempt
    pub timeout_per_attempt_ms: u64,
    /// Fraction of the backoff randomly added or removed
    pub jitter_factor: f64,
    /// Consecutive failures that open the circuit
    pub circuit_breaker_failure_threshold: u32,
    /// Cooldown before an open circuit lets a probe through
    pub circuit_breaker_duration_ms: u64,
    /// Error kinds that are never retried
    pub fatal_error_kinds: Vec<ErrorKind>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 5000,
            timeout_per_attempt_ms: 10_000,
            jitter_factor: 0.2,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_duration_ms: 30_000,
            fatal_error_kinds: Vec::new(),
        }
    }
}

impl ResilienceConfig {
    /// Checks the invariants the policy relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::DelayRange {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        if self.circuit_breaker_failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.timeout_per_attempt_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if !self.jitter_factor.is_finite() || self.jitter_factor < 0.0 {
            return Err(ConfigError::InvalidJitter(self.jitter_factor));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout_per_attempt(&self) -> Duration {
        Duration::from_millis(self.timeout_per_attempt_ms)
    }

    pub fn circuit_breaker_duration(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_duration_ms)
    }
}
