//! # Circuit Breaker
//!
//! A single breaker shared by every caller of a policy. The breaker trips
//! after a run of consecutive failures, rejects calls during a cooldown, and
//! then lets exactly one probe through to decide whether to close again.
//!
//! ```text
//! Closed --[failures reach threshold]--> Open --[cooldown elapsed]--> HalfOpen
//! HalfOpen --[probe succeeds]--> Closed
//! HalfOpen --[probe fails]--> Open
//! ```
//!
//! Every read-then-transition runs under one mutex, so concurrent callers
//! never observe a half-applied transition.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked
    Open,
    /// Testing recovery with a single probe
    HalfOpen,
}

impl CircuitState {
    fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF-OPEN"),
        }
    }
}

/// Permission to run one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// This attempt is the half-open probe
    pub probe: bool,
}

/// Why an attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// Time left before the circuit will admit a probe
    pub retry_after: Duration,
}

/// The mutable breaker record. Transitions take `now` explicitly so the
/// machine itself has no notion of a clock.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            probe_in_flight: false,
        }
    }
}

impl CircuitBreakerState {
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.last_failure_at
    }

    /// Decides whether an attempt may start.
    pub fn admit(&mut self, now: Instant, cooldown: Duration) -> Result<Admission, Rejection> {
        match self.state {
            CircuitState::Closed => Ok(Admission { probe: false }),
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(cooldown);
                if elapsed >= cooldown {
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    Ok(Admission { probe: true })
                } else {
                    Err(Rejection {
                        retry_after: cooldown - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Err(Rejection {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    self.probe_in_flight = true;
                    Ok(Admission { probe: true })
                }
            }
        }
    }

    /// Applies a successful attempt.
    pub fn on_success(&mut self, admission: Admission) {
        if admission.probe {
            self.probe_in_flight = false;
        }
        match self.state {
            CircuitState::HalfOpen | CircuitState::Closed => {
                self.state = CircuitState::Closed;
                self.consecutive_failures = 0;
            }
            // A stale success from before the trip does not close the circuit.
            CircuitState::Open => {}
        }
    }

    /// Applies a failed attempt.
    pub fn on_failure(&mut self, admission: Admission, now: Instant, threshold: u32) {
        if admission.probe {
            self.probe_in_flight = false;
        }
        self.last_failure_at = Some(now);
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= threshold {
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Gives back a probe slot without recording an outcome.
    pub fn release(&mut self, admission: Admission) {
        if admission.probe {
            self.probe_in_flight = false;
        }
    }
}

/// Point-in-time view of the breaker for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Milliseconds since the last recorded failure
    pub last_failure_age_ms: Option<u64>,
}

/// Thread-safe breaker bound to a clock and a configuration.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new<S: Into<String>>(
        name: S,
        failure_threshold: u32,
        cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breaker = Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            clock,
            inner: Mutex::new(CircuitBreakerState::default()),
        };
        gauge!("gateway_circuit_state", CircuitState::Closed.gauge_value());
        breaker
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = self.clock.now();
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state(),
            consecutive_failures: inner.consecutive_failures(),
            last_failure_age_ms: inner
                .last_failure_at()
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        }
    }

    /// Asks for permission to run one attempt. The returned [`Permit`] must
    /// be settled with [`Permit::success`] or [`Permit::failure`]; dropping it
    /// unsettled gives a half-open probe slot back without an outcome.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Rejection> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.state();
        let decision = inner.admit(now, self.cooldown);
        let after = inner.state();
        drop(inner);

        self.transitioned(before, after);
        if let Err(rejection) = decision {
            debug!(
                circuit = %self.name,
                remaining_ms = %rejection.retry_after.as_millis(),
                "Circuit open, request rejected"
            );
        }
        decision.map(|admission| Permit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        let before = inner.state();
        inner.on_success(admission);
        let after = inner.state();
        drop(inner);

        self.transitioned(before, after);
    }

    fn record_failure(&self, admission: Admission) {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.state();
        inner.on_failure(admission, now, self.failure_threshold);
        let after = inner.state();
        let failures = inner.consecutive_failures();
        drop(inner);

        if before == CircuitState::Closed && after == CircuitState::Open {
            warn!(
                circuit = %self.name,
                failure_count = %failures,
                threshold = %self.failure_threshold,
                "Circuit OPEN: Failure threshold exceeded"
            );
        } else if before == CircuitState::HalfOpen && after == CircuitState::Open {
            warn!(circuit = %self.name, "Circuit REOPENED: Failed in half-open state");
        }
        self.transitioned(before, after);
    }

    fn release(&self, admission: Admission) {
        self.lock().release(admission);
    }

    fn transitioned(&self, before: CircuitState, after: CircuitState) {
        if before == after {
            return;
        }
        match after {
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, "Circuit HALF-OPEN: Testing service recovery")
            }
            CircuitState::Closed => {
                info!(circuit = %self.name, "Circuit CLOSED: Service recovered")
            }
            CircuitState::Open => {}
        }
        gauge!("gateway_circuit_state", after.gauge_value());
        counter!("gateway_circuit_transitions_total", 1, "to" => after.as_str());
    }
}

/// One admitted attempt. Settles the breaker exactly once: with the recorded
/// outcome, or with a release when dropped unsettled (an attempt abandoned by
/// cancellation or by the caller dropping the future).
#[derive(Debug)]
#[must_use = "an unsettled permit releases its probe slot when dropped"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    /// This attempt is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.admission.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.admission);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.admission);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.admission);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const COOLDOWN: Duration = Duration::from_millis(100);

    fn breaker(threshold: u32) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new());
        let cb = CircuitBreaker::new("test", threshold, COOLDOWN, clock.clone());
        (clock, cb)
    }

    #[test]
    fn test_opens_after_threshold() {
        let (_clock, cb) = breaker(3);

        for _ in 0..2 {
            cb.try_acquire().unwrap().failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let rejection = cb.try_acquire().unwrap_err();
        assert!(rejection.retry_after <= COOLDOWN);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (_clock, cb) = breaker(3);

        cb.try_acquire().unwrap().failure();
        cb.try_acquire().unwrap().success();

        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let (clock, cb) = breaker(1);

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(COOLDOWN);
        let probe = cb.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // A concurrent caller is turned away while the probe is in flight.
        assert!(cb.try_acquire().is_err());

        probe.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn test_probe_failure_reopens_immediately() {
        let (clock, cb) = breaker(5);

        // Trip with five failures.
        for _ in 0..5 {
            cb.try_acquire().unwrap().failure();
        }
        clock.advance(COOLDOWN + Duration::from_millis(1));

        let probe = cb.try_acquire().unwrap();
        probe.failure();

        assert_eq!(cb.state(), CircuitState::Open);
        let rejection = cb.try_acquire().unwrap_err();
        assert_eq!(rejection.retry_after, COOLDOWN);
    }

    #[test]
    fn test_released_probe_lets_next_caller_probe() {
        let (clock, cb) = breaker(1);
        cb.try_acquire().unwrap().failure();
        clock.advance(COOLDOWN);

        let probe = cb.try_acquire().unwrap();
        drop(probe);

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let next = cb.try_acquire().unwrap();
        assert!(next.is_probe());
    }

    #[test]
    fn test_stale_success_does_not_close_open_circuit() {
        let mut state = CircuitBreakerState::default();
        let now = Instant::now();
        let admission = state.admit(now, COOLDOWN).unwrap();

        state.on_failure(Admission { probe: false }, now, 1);
        assert_eq!(state.state(), CircuitState::Open);

        state.on_success(admission);
        assert_eq!(state.state(), CircuitState::Open);
    }
}
