// gateway-rs/src/main.rs
// Remote execution gateway - HTTP entry point
//
// Loads settings, initialises logging, wires executors behind the shared
// resilience policy and serves the API until Ctrl-C.

use anyhow::Context;
use gateway::logging::init_logging;
use gateway::{build_state, router, GatewaySettings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = GatewaySettings::load().context("loading gateway settings")?;
    let _log_guard = init_logging(&settings.logging)?;

    let state = build_state(&settings)?;
    let shutdown = state.shutdown.clone();
    info!(
        executors = ?state.orchestrator.registry().names(),
        max_retries = %settings.resilience.max_retries,
        failure_threshold = %settings.resilience.circuit_breaker_failure_threshold,
        "Gateway configured"
    );

    let addr = settings.bind_address()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(address = %addr, "Gateway listening");

    axum::serve(listener, router(state, settings.server.body_limit_bytes))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received, cancelling in-flight requests");
            shutdown.cancel();
        })
        .await
        .context("serving HTTP")?;

    info!("Gateway stopped");
    Ok(())
}
