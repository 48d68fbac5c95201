//! Time source used by the policy for timeouts, backoff and circuit cooldown.
//!
//! `SystemClock` is backed by tokio's timer, so it also follows paused time in
//! tests. `ManualClock` never waits on a sleep: every sleep advances its own
//! notion of "now" and is recorded for inspection. Deadlines on a
//! `ManualClock` only expire once something calls `advance` past them.

use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Monotonic time plus an asynchronous sleep.
#[async_trait]
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);

    /// Completes once `duration` has elapsed on this clock. Used for limits
    /// raced against other work, as opposed to `sleep` which is a wait the
    /// caller asked for.
    async fn deadline(&self, duration: Duration) {
        self.sleep(duration).await;
    }

    /// Sleeps unless `cancel` fires first. Returns `false` when cancelled.
    async fn sleep_or_cancel(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.sleep(duration) => true,
        }
    }
}

/// Wall-clock implementation on top of `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
    advanced: Notify,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
            advanced: Notify::new(),
        }
    }

    /// Moves time forward without sleeping.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
        drop(offset);
        self.advanced.notify_waiters();
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + offset
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    async fn deadline(&self, duration: Duration) {
        let target = self.now() + duration;
        loop {
            let notified = self.advanced.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.now() >= target {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_millis(250)).await;
        clock.advance(Duration::from_millis(50));

        assert_eq!(clock.now() - start, Duration::from_millis(300));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel_aborts_early() {
        let clock = SystemClock;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let completed = clock
            .sleep_or_cancel(Duration::from_secs(60), &cancel)
            .await;

        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_manual_deadline_waits_for_advance() {
        let clock = ManualClock::new();
        let deadline = clock.deadline(Duration::from_secs(60));
        tokio::pin!(deadline);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(futures::poll!(deadline.as_mut()).is_pending());

        clock.advance(Duration::from_secs(30));
        assert!(futures::poll!(deadline.as_mut()).is_pending());

        clock.advance(Duration::from_secs(30));
        deadline.await;
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_sleep_or_cancel_completes() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        assert!(clock.sleep_or_cancel(Duration::from_millis(5), &cancel).await);
    }
}
