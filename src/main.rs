use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use sse_cluster::cluster::{create_membership, ClusterNode, HttpRemoteInvoker};
use sse_cluster::config::Settings;
use sse_cluster::server::{create_app, AppState};
use sse_cluster::shutdown::GracefulShutdown;
use sse_cluster::tasks::HeartbeatTask;
use sse_cluster::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing; the guard flushes exported spans on exit
    let _telemetry = init_telemetry(&settings.log, &settings.otel)?;
    tracing::info!(
        node_id = %settings.cluster.node_id,
        discovery = ?settings.cluster.discovery,
        "Configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let local = ClusterNode::local(settings.cluster.node_id.clone(), settings.advertise_address());

    // Membership view, plus its refresher when discovery is dynamic
    let membership = create_membership(&settings, &local, &shutdown_tx);
    let invoker = Arc::new(HttpRemoteInvoker::new(settings.cluster.secret.clone())?);

    let state = AppState::new(settings.clone(), membership.provider, invoker)?;
    tracing::info!(address = %local.address, "Application state initialized");

    let discovery_handle = membership
        .discovery
        .map(|discovery| tokio::spawn(discovery.run()));

    // Start dead-connection sweeper in background
    let heartbeat_task = HeartbeatTask::new(
        settings.sse.clone(),
        state.connection_manager.clone(),
        shutdown_tx.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(heartbeat_task.run());

    let shutdown = GracefulShutdown::new(state.connection_manager.clone(), shutdown_tx);
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = shutdown_signal().await;
            shutdown.execute(reason).await;
        })
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = heartbeat_handle.await;
    if let Some(handle) = discovery_handle {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "interrupted"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "terminated"
        }
    }
}
