//! Per-attempt stages the orchestrator wraps around an executor call.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use futures::FutureExt;
use resilience::{BoxedCall, Error, ErrorKind, Stage};
use tracing::{debug, warn};

use crate::models::{AttemptOutcome, ExecutionResult, ResilienceSummary};

/// Counts attempts and records each attempt's outcome in the summary.
///
/// An executor result with `is_success == false` is recorded as `Failure` and
/// turned into a retryable error. An attempt dropped before it finishes
/// (timeout or cancellation) is recorded as `Exception`.
pub struct AttemptRecorder<'s> {
    summary: &'s Mutex<ResilienceSummary>,
}

impl<'s> AttemptRecorder<'s> {
    pub fn new(summary: &'s Mutex<ResilienceSummary>) -> Self {
        Self { summary }
    }

    fn begin(&self) -> OutcomeSlot<'s> {
        lock(self.summary).total_attempts += 1;
        OutcomeSlot {
            summary: self.summary,
            filled: false,
        }
    }
}

fn lock(summary: &Mutex<ResilienceSummary>) -> std::sync::MutexGuard<'_, ResilienceSummary> {
    summary.lock().unwrap_or_else(|e| e.into_inner())
}

/// Appends exactly one outcome per attempt, `Exception` if dropped unfilled.
struct OutcomeSlot<'s> {
    summary: &'s Mutex<ResilienceSummary>,
    filled: bool,
}

impl OutcomeSlot<'_> {
    fn fill(mut self, outcome: AttemptOutcome) {
        lock(self.summary).attempt_outcomes.push(outcome);
        self.filled = true;
    }
}

impl Drop for OutcomeSlot<'_> {
    fn drop(&mut self) {
        if !self.filled {
            lock(self.summary)
                .attempt_outcomes
                .push(AttemptOutcome::Exception);
        }
    }
}

/// Error raised for an executor result that reports failure.
pub fn unsuccessful_result(result: &ExecutionResult) -> Error {
    let message = if result.error_messages.is_empty() {
        "Executor reported an unsuccessful result".to_string()
    } else {
        result.error_messages.join("; ")
    };

    let mut error = Error::new(ErrorKind::External, message).transient();
    if let Some(status) = result.metadata.get("StatusCode") {
        error = error.context("status_code", status);
    }
    error
}

impl<'s> Stage<ExecutionResult> for AttemptRecorder<'s> {
    fn wrap<'a>(&'a self, mut next: BoxedCall<'a, ExecutionResult>) -> BoxedCall<'a, ExecutionResult>
    where
        ExecutionResult: 'a,
    {
        Box::new(move |token| {
            let slot = self.begin();
            let attempt = next(token);
            async move {
                match attempt.await {
                    Ok(result) if result.is_success => {
                        slot.fill(AttemptOutcome::Success);
                        Ok(result)
                    }
                    Ok(result) => {
                        slot.fill(AttemptOutcome::Failure);
                        Err(unsuccessful_result(&result))
                    }
                    Err(error) => {
                        slot.fill(AttemptOutcome::Exception);
                        Err(error)
                    }
                }
            }
            .boxed()
        })
    }
}

/// Logs the start, duration and outcome of each attempt.
#[derive(Debug, Default)]
pub struct AttemptTracer {
    attempts: AtomicU32,
}

impl AttemptTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Send> Stage<T> for AttemptTracer {
    fn wrap<'a>(&'a self, mut next: BoxedCall<'a, T>) -> BoxedCall<'a, T>
    where
        T: 'a,
    {
        Box::new(move |token| {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let started = Instant::now();
            debug!(attempt = %attempt, "Attempt started");
            let call = next(token);
            async move {
                let outcome = call.await;
                let elapsed_ms = started.elapsed().as_millis();
                match &outcome {
                    Ok(_) => debug!(attempt = %attempt, elapsed_ms = %elapsed_ms, "Attempt succeeded"),
                    Err(error) => warn!(
                        attempt = %attempt,
                        elapsed_ms = %elapsed_ms,
                        error_kind = %error.kind,
                        "Attempt failed"
                    ),
                }
                outcome
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resilience::Pipeline;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn result(is_success: bool) -> ExecutionResult {
        ExecutionResult::started().finish(is_success, json!("payload"))
    }

    #[tokio::test]
    async fn test_records_each_outcome_kind() {
        let summary = Mutex::new(ResilienceSummary::default());
        let recorder = AttemptRecorder::new(&summary);
        let mut calls = 0;

        {
            let mut call = Pipeline::<ExecutionResult>::new().stage(&recorder).build(move |_| {
                calls += 1;
                let n = calls;
                async move {
                    match n {
                        1 => Err(Error::new(ErrorKind::Communication, "refused")),
                        2 => Ok(result(false)),
                        _ => Ok(result(true)),
                    }
                }
            });

            assert!(call(CancellationToken::new()).await.is_err());
            let err = call(CancellationToken::new()).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::External);
            assert!(err.is_transient());
            assert!(call(CancellationToken::new()).await.is_ok());
        }

        let summary = summary.into_inner().unwrap();
        assert_eq!(summary.total_attempts, 3);
        assert_eq!(
            summary.attempt_outcomes,
            vec![
                AttemptOutcome::Exception,
                AttemptOutcome::Failure,
                AttemptOutcome::Success
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_attempt_is_an_exception() {
        let summary = Mutex::new(ResilienceSummary::default());
        let recorder = AttemptRecorder::new(&summary);

        {
            let mut call = Pipeline::<ExecutionResult>::new()
                .stage(&recorder)
                .build(|_| futures::future::pending::<resilience::Result<ExecutionResult>>());
            let attempt = call(CancellationToken::new());
            drop(attempt);
        }

        let summary = summary.into_inner().unwrap();
        assert_eq!(summary.total_attempts, 1);
        assert_eq!(summary.attempt_outcomes, vec![AttemptOutcome::Exception]);
    }

    #[test]
    fn test_unsuccessful_result_keeps_status() {
        let mut failed = result(false);
        failed.metadata.insert("StatusCode".into(), "502".into());
        failed.error_messages.push("bad gateway".into());

        let error = unsuccessful_result(&failed);
        assert_eq!(error.message, "bad gateway");
        assert_eq!(error.context.get("status_code"), Some(&json!("502")));
    }
}
