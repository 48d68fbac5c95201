//! # Structured Logging
//!
//! Subscriber bootstrap for the gateway: env filter, JSON or text console
//! output and an optional daily rolling log file.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name, also used as the log file prefix
    pub service_name: String,
    /// Whether to output logs to a file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "gateway".to_string(),
            file_output: false,
            log_dir: None,
            json_format: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to set global subscriber: {0}")]
pub struct LoggingError(String);

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `config.level`. The returned guard flushes the file writer on drop and must
/// be held for the life of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(None);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.level)));

    let console = if config.json_format {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_thread_ids(true).boxed()
    };

    let (file, guard) = match (config.file_output, config.log_dir.as_deref()) {
        (true, Some(dir)) => {
            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                dir,
                format!("{}.log", config.service_name),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    let subscriber = Registry::default().with(filter).with(console).with(file);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
        LoggingError(e.to_string())
    })?;

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_partial_json() {
        let config: LoggingConfig =
            serde_json::from_str(r#"{"level": "debug", "json_format": false}"#).unwrap();
        assert_eq!(config.level, "debug");
        assert!(!config.json_format);
        assert_eq!(config.service_name, "gateway");
    }
}
