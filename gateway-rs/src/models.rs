//! Request, result and envelope types exchanged between the transport layer,
//! the orchestrator and the executors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inbound call, immutable once built and shared across retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub request_id: String,
    pub correlation_id: String,
    pub executor_type: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_info: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ExecutionRequest {
    /// Builds a request with a fresh id and the correlation id defaulted to it.
    pub fn new<S: Into<String>>(executor_type: S, payload: serde_json::Value) -> Self {
        let request_id = Uuid::new_v4().to_string();
        Self {
            correlation_id: request_id.clone(),
            request_id,
            executor_type: executor_type.into(),
            payload,
            path_info: None,
            context: HashMap::new(),
        }
    }

    /// Uses the caller's id when present and non-blank.
    pub fn request_id(mut self, id: Option<&str>) -> Self {
        if let Some(id) = id.filter(|s| !s.trim().is_empty()) {
            let defaulted = self.correlation_id == self.request_id;
            self.request_id = id.to_string();
            if defaulted {
                self.correlation_id = self.request_id.clone();
            }
        }
        self
    }

    /// Uses the caller's correlation id when present and non-blank.
    pub fn correlation_id(mut self, id: Option<&str>) -> Self {
        if let Some(id) = id.filter(|s| !s.trim().is_empty()) {
            self.correlation_id = id.to_string();
        }
        self
    }

    pub fn path_info(mut self, path: Option<String>) -> Self {
        self.path_info = path.filter(|p| !p.is_empty());
        self
    }

    pub fn context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// What one executor invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub is_success: bool,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub error_messages: Vec<String>,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: DateTime<Utc>,
}

impl ExecutionResult {
    /// Starts a result stamped with the current time.
    pub fn started() -> Self {
        let now = Utc::now();
        Self {
            is_success: false,
            data: serde_json::Value::Null,
            metadata: HashMap::new(),
            error_messages: Vec::new(),
            start_time_utc: now,
            end_time_utc: now,
        }
    }

    /// Stamps the end time and records the outcome.
    pub fn finish(mut self, is_success: bool, data: serde_json::Value) -> Self {
        self.end_time_utc = Utc::now();
        self.is_success = is_success;
        self.data = data;
        self
    }

    pub fn latency_ms(&self) -> f64 {
        (self.end_time_utc - self.start_time_utc)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    Failure,
    Exception,
}

/// Per-request record of attempts made through the policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResilienceSummary {
    pub total_attempts: u32,
    pub was_throttled: bool,
    pub attempt_outcomes: Vec<AttemptOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    ExecutorNotSupported,
    CircuitOpen,
    UnhandledError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ExecutorNotSupported => "ExecutorNotSupported",
            ErrorCode::CircuitOpen => "CircuitOpen",
            ErrorCode::UnhandledError => "UnhandledError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn executor_not_supported(executor_type: &str) -> Self {
        Self {
            code: ErrorCode::ExecutorNotSupported,
            message: format!("Executor type '{}' is not supported.", executor_type),
        }
    }

    pub fn circuit_open() -> Self {
        Self {
            code: ErrorCode::CircuitOpen,
            message: "Circuit is open. Requests are temporarily blocked.".to_string(),
        }
    }

    pub fn unhandled() -> Self {
        Self {
            code: ErrorCode::UnhandledError,
            message: "An unexpected error occurred while processing the request.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeResult {
    Error(ErrorInfo),
    Data(serde_json::Value),
}

/// The terminal, serializable answer for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: String,
    pub correlation_id: String,
    pub status: ResponseStatus,
    pub result: EnvelopeResult,
    pub resilience: ResilienceSummary,
    pub timestamp_utc: DateTime<Utc>,
}

impl ResponseEnvelope {
    pub fn error(&self) -> Option<&ErrorInfo> {
        match &self.result {
            EnvelopeResult::Error(info) => Some(info),
            EnvelopeResult::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        match &self.result {
            EnvelopeResult::Data(value) => Some(value),
            EnvelopeResult::Error(_) => None,
        }
    }
}
