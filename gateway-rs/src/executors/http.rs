//! Outbound HTTP executor.
//!
//! Payload: `{"url": "...", "method": "GET", "headers": {..}, "body": <json>}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use resilience::{Error, ErrorKind, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Executor;
use crate::models::{ExecutionRequest, ExecutionResult};
use crate::settings::HttpExecutorConfig;

const TRUNCATION_SUFFIX: &str = "...(truncated)";

#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    truncate_limit: usize,
}

impl HttpExecutor {
    pub fn new(config: &HttpExecutorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::new(ErrorKind::Internal, "Failed to build HTTP client").cause(e))?;

        Ok(Self {
            client,
            truncate_limit: config.truncate_limit,
        })
    }

    fn build(&self, payload: &Value) -> Result<reqwest::RequestBuilder> {
        let (url, method) = match (
            payload.get("url").and_then(Value::as_str),
            payload.get("method").and_then(Value::as_str),
        ) {
            (Some(url), Some(method)) => (url, method),
            _ => {
                return Err(Error::new(
                    ErrorKind::Validation,
                    "Payload must contain 'url' and 'method'",
                ))
            }
        };

        let method = Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|e| {
            Error::new(ErrorKind::Validation, format!("Invalid HTTP method '{}'", method)).cause(e)
        })?;

        let mut builder = self.client.request(method, url);

        if let Some(headers) = payload.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                builder = builder.header(name.as_str(), value);
            }
        }

        if let Some(body) = payload.get("body") {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        Ok(builder)
    }
}

/// Maps a client error onto the gateway error kinds.
pub fn classify(err: reqwest::Error) -> Error {
    let (kind, transient) = if err.is_timeout() {
        (ErrorKind::Timeout, true)
    } else if err.is_connect() || err.is_request() {
        (ErrorKind::Communication, true)
    } else if err.is_builder() {
        (ErrorKind::Validation, false)
    } else {
        (ErrorKind::Communication, false)
    };

    let error = Error::new(kind, err.to_string());
    let error = if transient { error.transient() } else { error };
    error.cause(err)
}

/// Cuts `content` to `limit` characters and marks the cut.
pub fn truncate(content: String, limit: usize) -> String {
    match content.char_indices().nth(limit) {
        Some((byte_index, _)) => {
            let mut truncated = content[..byte_index].to_string();
            truncated.push_str(TRUNCATION_SUFFIX);
            truncated
        }
        None => content,
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::started();
        let builder = self.build(&request.payload)?;

        let call = async {
            let response = builder.send().await.map_err(classify)?;
            let status = response.status();
            let content = response.text().await.map_err(classify)?;
            Ok::<_, Error>((status, content))
        };

        let (status, content) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::new(ErrorKind::Cancelled, "HTTP call cancelled"));
            }
            outcome = call => outcome?,
        };

        debug!(status = %status.as_u16(), bytes = %content.len(), "HTTP executor response");
        result
            .metadata
            .insert("StatusCode".to_string(), status.as_u16().to_string());

        Ok(result.finish(
            status.is_success(),
            Value::String(truncate(content, self.truncate_limit)),
        ))
    }
}
