//! healwatch agent
//!
//! Serves monitoring sessions over WebSocket, exposes this node's own
//! readings at `/monitor` and owns the process-wide self-heal controller.

use anyhow::{Context, Result};
use healwatch_lib::{
    collector::{CollectorProvider, DefaultCollectorProvider, LocalBackend, LocalSource},
    healing::SelfHealingController,
    health::{components, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    session::SessionRegistry,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod logs;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let log_ring = logs::LogRing::new(logs::LOG_CAPACITY);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .with(log_ring.layer())
        .init();

    let config = config::AgentConfig::load()?;
    info!(node_name = %config.node_name, port = config.api_port, "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::LOCAL_COLLECTOR).await;
    health_registry.register(components::SELF_HEAL).await;
    health_registry.register(components::SESSIONS).await;

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let backend = config.local_backend()?;
    let local_source = LocalSource::detect(backend, Path::new(&config.proc_path)).await;
    if backend == LocalBackend::Os && local_source.name() != "local" {
        health_registry
            .set_degraded(
                components::LOCAL_COLLECTOR,
                "OS counters unavailable, serving synthetic samples",
            )
            .await;
    }

    let provider = DefaultCollectorProvider::new(local_source.clone(), config.remote_timeout())
        .context("failed to build remote HTTP client")?;
    // Own baseline for /monitor, separate from every session's
    let monitor_collector = provider.local();
    let controller = Arc::new(SelfHealingController::new(config.initial_policy()));
    let (shutdown_tx, _) = broadcast::channel(1);

    logger.log_startup(AGENT_VERSION, local_source.name());

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics,
        logger: logger.clone(),
        controller,
        provider: Arc::new(provider),
        sessions: Arc::new(SessionRegistry::new()),
        session_config: config.session_config(),
        restart_target: config.restart_target.clone(),
        shutdown: shutdown_tx.clone(),
        logs: log_ring,
        monitor_collector,
        monitor_log: Mutex::new(api::MonitorLog::default()),
    });

    health_registry.set_ready(true).await;

    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    return Err(e);
                }
                Err(e) => return Err(e).context("API server task panicked"),
            }
            return Ok(());
        }
    }

    // Stops every session loop and the listener
    let _ = shutdown_tx.send(());
    if let Err(e) = api_handle.await {
        error!(error = %e, "API server task failed during shutdown");
    }

    info!("Shutdown complete");
    Ok(())
}
