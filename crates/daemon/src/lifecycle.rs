// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, serving, two-phase signal shutdown.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use idaproxy_core::{ConfigError, ProxyConfig, SystemClock};

use crate::listener;
use crate::pool::{WorkerBackend, WorkerPool};
use crate::registry::SessionRegistry;
use crate::router::Router;

/// Registry and router with the concrete production clock
pub type DaemonRegistry = SessionRegistry<SystemClock>;
pub type DaemonRouter = Router<SystemClock>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Run the proxy until a shutdown signal arrives.
pub async fn run(mut config: ProxyConfig) -> Result<(), LifecycleError> {
    config.validate()?;
    if let Some(command) = crate::env::worker_command_override() {
        config.worker_command = command;
    }

    let pool = Arc::new(WorkerPool::new(&config));
    let backend: Arc<dyn WorkerBackend> = pool.clone();
    let registry: Arc<DaemonRegistry> =
        Arc::new(SessionRegistry::new(config.max_processes, backend.clone(), SystemClock));
    let router: Arc<DaemonRouter> = Arc::new(Router::new(registry.clone(), backend));

    // The proxy still serves when no worker can be launched; tools/list
    // stays empty until a binary is opened.
    match pool.ensure_default().await {
        Ok(port) => {
            info!(port, "default worker ready");
            router.refresh_tools().await;
        }
        Err(e) => {
            error!(error = %e, "failed to start default worker");
            warn!("server will start but tools/list will be empty until a binary is opened");
        }
    }

    let addr = format!("{}:{}", config.host, config.port);
    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| LifecycleError::BindFailed { addr: addr.clone(), source: e })?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        max_processes = config.max_processes,
        "proxy listening"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    axum::serve(tcp, listener::app(router))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .map_err(LifecycleError::Serve)?;

    // Sessions are released best-effort before workers go away.
    info!("shutting down");
    registry.close_all().await;
    pool.stop_all().await;
    info!("shutdown complete");
    Ok(())
}

/// First SIGINT/SIGTERM starts a graceful shutdown; a second forces exit.
#[cfg(unix)]
fn spawn_signal_handler(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(sigint) => sigint,
            Err(e) => {
                error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        info!("received signal, shutting down");
        shutdown.cancel();

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        warn!("forced exit on second signal");
        std::process::exit(1);
    });
}

#[cfg(not(unix))]
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("received signal, shutting down");
        shutdown.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("forced exit on second signal");
            std::process::exit(1);
        }
    });
}
