//! biogate - HTTP gateway for biometric attendance terminals.

mod args;
mod simulate;

use anyhow::{Context, Result, bail};
use args::Args;
use biogate_device::{DeviceService, DeviceStatusCache, StatusPoller};
use biogate_network::{AppState, BroadcastHub, relay_status_changes, serve};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.to_config()?;
    init_tracing(config.debug);

    if !args.simulate {
        bail!("no terminal protocol driver is built into this binary; start with --simulate");
    }

    info!(
        version = biogate_core::VERSION,
        devices = config.known_devices.len(),
        workers = config.max_workers,
        "Starting biogate"
    );

    let shutdown = CancellationToken::new();
    let connector = simulate::connector(&config.known_devices);
    let punches = tokio::spawn(simulate::generate_punches(
        connector.clone(),
        args.punch_interval(),
        shutdown.child_token(),
    ));

    let service = DeviceService::new(Arc::new(connector), &config);
    let status = DeviceStatusCache::new();
    let hub = BroadcastHub::new();

    let poller = StatusPoller::new(
        service.clone(),
        status.clone(),
        config.known_devices.clone(),
        config.check_interval,
    );
    let relay = tokio::spawn(relay_status_changes(
        poller.subscribe_changes(),
        hub.clone(),
        shutdown.child_token(),
    ));
    let polling = tokio::spawn(poller.run(shutdown.child_token()));

    let state = AppState::new(service.clone(), status, hub, &config).with_shutdown(shutdown.clone());
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let served = serve(listener, state).await;
    shutdown.cancel();

    for (name, task) in [("poller", polling), ("status relay", relay), ("punch generator", punches)] {
        join_background(name, task).await;
    }
    let closed = service.shutdown().await;
    info!(closed_sessions = closed, "Shutdown complete");

    served.context("HTTP server failed")
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn join_background(name: &str, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        warn!(task = name, error = %e, "Background task ended abnormally");
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = token.cancelled() => return,
    }
    info!("Shutdown signal received");
    token.cancel();
}
