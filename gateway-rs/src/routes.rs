//! HTTP surface: ping, metrics, circuit state and the executor proxy.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::metrics::MetricsCollector;
use crate::models::{ErrorCode, ExecutionRequest, ResponseEnvelope, ResponseStatus};
use crate::orchestrator::RequestOrchestrator;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const ATTEMPT_COUNT_HEADER: &str = "x-attempt-count";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RequestOrchestrator>,
    pub metrics: Arc<dyn MetricsCollector>,
    /// Parent of every request's cancellation token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: Arc<RequestOrchestrator>, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self {
            orchestrator,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: AppState, body_limit_bytes: usize) -> Router {
    let proxy = get(dispatch)
        .post(dispatch)
        .put(dispatch)
        .delete(dispatch)
        .patch(dispatch);

    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/metrics", get(metrics))
        .route("/api/circuit", get(circuit))
        .route("/api/:executor_type", proxy.clone())
        .route("/api/:executor_type/*path", proxy)
        .layer(RequestBodyLimitLayer::new(body_limit_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn circuit(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.policy().circuit_snapshot())
}

#[derive(Debug, Deserialize)]
struct ProxyPath {
    executor_type: String,
    #[serde(default)]
    path: Option<String>,
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Maps an envelope onto the HTTP status returned to the caller.
pub fn status_for(envelope: &ResponseEnvelope) -> StatusCode {
    match (envelope.status, envelope.error().map(|e| e.code)) {
        (ResponseStatus::Success, _) => StatusCode::OK,
        (_, Some(ErrorCode::ExecutorNotSupported)) => StatusCode::BAD_REQUEST,
        (_, Some(ErrorCode::CircuitOpen)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn dispatch(
    State(state): State<AppState>,
    Path(params): Path<ProxyPath>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Rejected request with invalid JSON body");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "Request body is not valid JSON", "detail": e.to_string() })),
                )
                    .into_response();
            }
        }
    };

    let request = ExecutionRequest::new(params.executor_type, payload)
        .request_id(header(&headers, REQUEST_ID_HEADER))
        .correlation_id(header(&headers, CORRELATION_ID_HEADER))
        .path_info(params.path)
        .context("Method", method.as_str())
        .context(
            "QueryString",
            uri.query().map(|q| format!("?{}", q)).unwrap_or_default(),
        );

    // Client disconnect drops this future, which cancels the request.
    let cancel = state.shutdown.child_token();
    let _disconnect = cancel.clone().drop_guard();

    let envelope = state.orchestrator.handle(request, cancel).await;
    let status = status_for(&envelope);

    let mut response_headers = HeaderMap::new();
    for (name, value) in [
        (REQUEST_ID_HEADER, envelope.request_id.clone()),
        (CORRELATION_ID_HEADER, envelope.correlation_id.clone()),
        (ATTEMPT_COUNT_HEADER, envelope.resilience.total_attempts.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response_headers.insert(HeaderName::from_static(name), value);
        }
    }

    (status, response_headers, Json(envelope)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnvelopeResult, ErrorInfo, ResilienceSummary};
    use chrono::Utc;

    fn envelope(status: ResponseStatus, result: EnvelopeResult) -> ResponseEnvelope {
        ResponseEnvelope {
            request_id: "r".into(),
            correlation_id: "r".into(),
            status,
            result,
            resilience: ResilienceSummary::default(),
            timestamp_utc: Utc::now(),
        }
    }

    #[test]
    fn test_status_mapping() {
        let ok = envelope(ResponseStatus::Success, EnvelopeResult::Data(json!([])));
        assert_eq!(status_for(&ok), StatusCode::OK);

        let cases = [
            (ErrorInfo::executor_not_supported("ftp"), StatusCode::BAD_REQUEST),
            (ErrorInfo::circuit_open(), StatusCode::SERVICE_UNAVAILABLE),
            (ErrorInfo::unhandled(), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (info, expected) in cases {
            let failed = envelope(ResponseStatus::Failed, EnvelopeResult::Error(info));
            assert_eq!(status_for(&failed), expected);
        }
    }
}
