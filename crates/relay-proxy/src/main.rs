//! CortexRelay server binary.
//!
//! Wires config, the tenant index and its reconciler, the metrics listener,
//! and the ingress server together, and owns the drain-then-shutdown
//! sequence.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use cortex_relay_proxy::config::Config;
use cortex_relay_proxy::http::{self, AppState};
use cortex_relay_proxy::metrics;
use cortex_relay_tenants::{FileTenantSource, Reconciler, TenantIndex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cortex-relay", version, about = "Tenant-routing reverse proxy for Prometheus Remote Write")]
struct Args {
    /// Path to the YAML config file.
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg = match Config::load(&args.config) {
        Ok(cfg) => Arc::new(cfg),
        Err(err) => {
            eprintln!("unable to load config {}: {err}", args.config.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone())),
        )
        .init();

    info!(backend = %cfg.backend.url, listen = %cfg.listen, "loaded config");

    let index = Arc::new(TenantIndex::new());

    if let Some(discovery) = &cfg.discovery {
        let source = FileTenantSource::new(&discovery.file);
        let reconciler = Reconciler::new(Arc::clone(&index));

        // The index must be complete before traffic arrives, otherwise every
        // series would classify to the fallback tenant.
        if let Err(err) = reconciler.bootstrap(&source).await {
            error!(error = %err, "unable to bootstrap tenant index");
            std::process::exit(1);
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(source.watch(tx, discovery.poll_interval));
        tokio::spawn(reconciler.run(rx));
    } else {
        warn!("no tenant discovery configured, series will rely on tenant.default");
    }

    let state = match AppState::new(Arc::clone(&cfg), index) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "unable to build upstream client");
            std::process::exit(1);
        }
    };

    let metrics_listener = match TcpListener::bind(cfg.listen_metrics).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %cfg.listen_metrics, error = %err, "unable to bind metrics listener");
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.listen_metrics, "metrics listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, metrics::router()).await {
            error!(error = %err, "metrics server failed");
        }
    });

    let listener = match TcpListener::bind(cfg.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %cfg.listen, error = %err, "unable to bind ingress listener");
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.listen, "cortex-relay listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let draining = Arc::clone(&state.draining);
    let drain_delay = cfg.timeout_shutdown;
    tokio::spawn(async move {
        shutdown_signal().await;

        // Flip liveness first and give load balancers time to notice before
        // the listener stops accepting.
        draining.store(true, Ordering::Release);
        info!(delay = ?drain_delay, "shutdown signal received, draining");
        tokio::time::sleep(drain_delay).await;

        let _ = shutdown_tx.send(());
    });

    let app = http::app(state);
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });

    if let Err(err) = serve.await {
        error!(error = %err, "server failed");
        std::process::exit(1);
    }

    info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("unable to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("unable to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
