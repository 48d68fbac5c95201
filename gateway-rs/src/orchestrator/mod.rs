//! # Request Orchestrator
//!
//! Selects the executor for a request, drives it through the shared
//! [`ResiliencePolicy`] and turns whatever happens into a
//! [`ResponseEnvelope`]. `handle` never fails: every error path ends in a
//! populated envelope.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::FutureExt;
use resilience::{Error, ErrorKind, Failure, Pipeline, ResilienceError, ResiliencePolicy};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::executors::ExecutorRegistry;
use crate::metrics::MetricsCollector;
use crate::models::{
    EnvelopeResult, ErrorInfo, ExecutionRequest, ExecutionResult, ResilienceSummary,
    ResponseEnvelope, ResponseStatus,
};
use crate::sanitization::{describe_error, sanitize};

pub mod stages;

pub use stages::{AttemptRecorder, AttemptTracer};

enum Rejection {
    NotSupported,
    Policy(ResilienceError),
}

pub struct RequestOrchestrator {
    registry: ExecutorRegistry,
    policy: Arc<ResiliencePolicy>,
    metrics: Arc<dyn MetricsCollector>,
}

impl RequestOrchestrator {
    pub fn new(
        registry: ExecutorRegistry,
        policy: Arc<ResiliencePolicy>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Runs one request to completion and describes the outcome.
    pub async fn handle(&self, request: ExecutionRequest, cancel: CancellationToken) -> ResponseEnvelope {
        let span = info_span!(
            "request",
            request_id = %request.request_id,
            correlation_id = %request.correlation_id,
            executor_type = %request.executor_type,
        );
        self.dispatch(request, cancel).instrument(span).await
    }

    async fn dispatch(&self, request: ExecutionRequest, cancel: CancellationToken) -> ResponseEnvelope {
        let timestamp_utc = Utc::now();
        let summary = Mutex::new(ResilienceSummary::default());

        self.metrics.record_request(&request.executor_type);
        info!(
            path = ?request.path_info,
            payload = %sanitize(&request.payload.to_string()),
            "Dispatching request"
        );

        let outcome = match self.registry.get(&request.executor_type) {
            None => Err(Rejection::NotSupported),
            Some(executor) => {
                let recorder = AttemptRecorder::new(&summary);
                let tracer = AttemptTracer::new();
                let request = &request;

                let call = Pipeline::<ExecutionResult>::new()
                    .stage(&tracer)
                    .stage(&recorder)
                    .build(move |token| {
                        let executor = executor.clone();
                        async move {
                            AssertUnwindSafe(executor.execute(request, token))
                                .catch_unwind()
                                .await
                                .unwrap_or_else(|_| {
                                    Err(Error::new(ErrorKind::Internal, "Executor panicked"))
                                })
                        }
                    });

                self.policy
                    .execute(call, &cancel)
                    .await
                    .map_err(Rejection::Policy)
            }
        };

        let mut resilience = summary.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let executor_type = request.executor_type.as_str();

        let (status, result) = match outcome {
            Ok(result) => {
                self.metrics.record_success(executor_type);
                self.metrics.record_latency(executor_type, result.latency_ms());
                info!(
                    attempts = %resilience.total_attempts,
                    latency_ms = %result.latency_ms(),
                    "Request succeeded"
                );
                (ResponseStatus::Success, EnvelopeResult::Data(result.data))
            }
            Err(rejection) => {
                self.metrics.record_failure(executor_type, false);
                let info = match rejection {
                    Rejection::NotSupported => {
                        error!("Executor type '{}' is not supported", executor_type);
                        ErrorInfo::executor_not_supported(executor_type)
                    }
                    Rejection::Policy(err) => {
                        log_policy_error(&err, &resilience);
                        if err.is_circuit_open() {
                            resilience.was_throttled = resilience.total_attempts == 0;
                            ErrorInfo::circuit_open()
                        } else {
                            ErrorInfo::unhandled()
                        }
                    }
                };
                (ResponseStatus::Failed, EnvelopeResult::Error(info))
            }
        };

        ResponseEnvelope {
            request_id: request.request_id,
            correlation_id: request.correlation_id,
            status,
            result,
            resilience,
            timestamp_utc,
        }
    }
}

fn log_policy_error(err: &ResilienceError, summary: &ResilienceSummary) {
    let details: Vec<String> = err
        .failures()
        .iter()
        .map(|failure| match failure {
            Failure::Retryable { attempt, error } | Failure::Fatal { attempt, error } => {
                format!("attempt {}: {}", attempt, describe_error(error))
            }
            other => sanitize(&other.to_string()).into_owned(),
        })
        .collect();

    match err {
        ResilienceError::Cancelled => warn!(
            attempts = %summary.total_attempts,
            "Request cancelled by caller"
        ),
        _ => error!(
            error = %err,
            attempts = %summary.total_attempts,
            failures = ?details,
            "Error handling request"
        ),
    }
}
