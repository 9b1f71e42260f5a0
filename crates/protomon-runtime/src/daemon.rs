//! `protomon serve`: registry + UDS server until a shutdown signal.

use std::sync::Arc;

use protomon_core::config::EngineConfig;
use protomon_registry::ProtocolStatusRegistry;

use crate::server;

pub async fn run_daemon(config: EngineConfig, socket_path: &str) -> anyhow::Result<()> {
    tracing::info!(
        "engine config: staleness {}s, history {}, rate limit {}/{}s",
        config.staleness.default_secs,
        config.history.capacity,
        config.rate_limit.max_attempts,
        config.rate_limit.window_secs
    );
    let registry = Arc::new(ProtocolStatusRegistry::new(config));

    // Start UDS server
    let server_registry = Arc::clone(&registry);
    let server_socket = socket_path.to_string();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_registry).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    tokio::select! {
        () = shutdown_signal() => {}
        _ = &mut server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }
    server_handle.abort();

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped ({} sources tracked)", registry.len());
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("cannot register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
