//! # Standardized Error Types
//!
//! The error type carried by operations wrapped in the resilience policy and
//! by every executor behind the gateway.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categorizes different kinds of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or incomplete input
    Validation,
    /// Request refused by a security rule (allowlist, sandbox)
    Security,
    /// Error in communication with a backend
    Communication,
    /// Backend answered, but with a failure
    External,
    /// Timeout error
    Timeout,
    /// Resource unavailable or service degraded
    Unavailable,
    /// Input/output error
    IO,
    /// Error in data processing or transformation
    Processing,
    /// The caller withdrew the request
    Cancelled,
    /// Internal server error
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "Validation Error"),
            ErrorKind::Security => write!(f, "Security Error"),
            ErrorKind::Communication => write!(f, "Communication Error"),
            ErrorKind::External => write!(f, "External Service Error"),
            ErrorKind::Timeout => write!(f, "Timeout Error"),
            ErrorKind::Unavailable => write!(f, "Service Unavailable Error"),
            ErrorKind::IO => write!(f, "I/O Error"),
            ErrorKind::Processing => write!(f, "Processing Error"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
            ErrorKind::Internal => write!(f, "Internal Server Error"),
        }
    }
}

/// Core error type for operations and executors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    /// A unique identifier for this error instance
    pub id: Uuid,
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Detailed error message
    pub message: String,
    /// The time when the error occurred
    pub timestamp: DateTime<Utc>,
    /// Additional context as key-value pairs
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Underlying cause (not serialized)
    #[serde(skip)]
    pub cause: Option<Arc<dyn StdError + Send + Sync>>,
    /// Flag indicating if this is a transient error that might succeed on retry
    pub transient: bool,
}

impl Error {
    /// Creates a new error with the specified kind and message
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            context: serde_json::Map::new(),
            cause: None,
            transient: false,
        }
    }

    /// Adds context information to the error
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Chains this error with its cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Marks this error as transient
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::IO,
        };
        Self::new(kind, err.to_string()).cause(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Processing, format!("JSON error: {}", err)).cause(err)
    }
}
