//! # Gateway
//!
//! Accepts generic execution requests over HTTP, routes each one to a named
//! executor and runs it behind the shared resilience policy, aggregating
//! per-executor metrics along the way.

pub mod executors;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod routes;
pub mod sanitization;
pub mod settings;

use std::sync::Arc;

use resilience::ResiliencePolicy;

pub use executors::{CommandExecutor, Executor, ExecutorRegistry, HttpExecutor};
pub use metrics::{MetricsAggregator, MetricsCollector, MetricsSnapshot};
pub use models::{ExecutionRequest, ExecutionResult, ResponseEnvelope};
pub use orchestrator::RequestOrchestrator;
pub use routes::{router, AppState};
pub use settings::GatewaySettings;

/// Wires the executors, policy, metrics and orchestrator described by
/// `settings` into application state.
pub fn build_state(settings: &GatewaySettings) -> anyhow::Result<AppState> {
    let registry = ExecutorRegistry::new()
        .with(HttpExecutor::new(&settings.executors.http)?)?
        .with(CommandExecutor::new(&settings.executors.command))?;

    let policy = Arc::new(ResiliencePolicy::new(settings.resilience.clone())?);
    let metrics: Arc<dyn MetricsCollector> = Arc::new(MetricsAggregator::new());
    let orchestrator = Arc::new(RequestOrchestrator::new(registry, policy, metrics.clone()));

    Ok(AppState::new(orchestrator, metrics))
}
