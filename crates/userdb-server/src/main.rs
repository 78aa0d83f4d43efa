//! userdb server - user records with live change notifications.

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use userdb_server::{Args, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "userdb_server=info,userdb_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol_version = userdb_proto::PROTOCOL_VERSION,
        "starting userdb server"
    );

    let config = Args::parse().into_config();

    tracing::info!(
        data_path = %config.data_path.display(),
        listen = %config.listen_address,
        queue_capacity = config.queue_capacity,
        send_timeout_ms = config.send_timeout.as_millis() as u64,
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let listener = TcpListener::bind(config.listen_address).await?;
    let server = Server::open(config, shutdown.clone())?;

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("received shutdown signal");
        shutdown.cancel();
    });

    tracing::info!("server ready, accepting connections");
    server.serve(listener).await?;
    tracing::info!("server shutdown complete");

    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
