//! kvstore server - standalone key-value server with change subscriptions.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kvstore_core::KvService;
use kvstore_server::health::serve_health;
use kvstore_server::{Args, LogFormat, RequestHandler, Transport};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kvstore_server=info,kvstore_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Resolve once ctrl+c or (on unix) SIGTERM arrives.
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
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "received shutdown signal"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "received shutdown signal"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.into_config()?;

    init_tracing(config.log_format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol_version = kvstore_proto::PROTOCOL_VERSION,
        "starting kvstore server"
    );
    tracing::info!(
        listen_address = %config.listen_address,
        health_address = ?config.health_address,
        queue_capacity = config.watch.queue_capacity,
        shutdown_timeout_secs = config.shutdown_timeout.as_secs(),
        "configuration loaded"
    );

    let service = KvService::new(config.watch.clone());
    let handler = Arc::new(RequestHandler::new(service.clone()));
    let transport = Transport::bind(&config, handler).await?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let health = match &config.health_address {
        Some(address) => {
            let listener = TcpListener::bind(address).await?;
            Some(tokio::spawn(serve_health(
                listener,
                service.clone(),
                shutdown_tx.subscribe(),
            )))
        }
        None => None,
    };

    let mut server = tokio::spawn(transport.run_until_shutdown(shutdown_tx.subscribe()));

    tracing::info!("server ready, accepting connections");

    let early_exit = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut server => Some(result),
    };

    // readiness flips before connections are torn down
    service.shutdown();
    let _ = shutdown_tx.send(());

    let result = match early_exit {
        Some(result) => result,
        None => server.await,
    };

    if let Some(health) = health {
        match health.await {
            Ok(Err(e)) => tracing::error!(error = %e, "health listener error"),
            Err(e) => tracing::error!(error = %e, "health task failed"),
            Ok(Ok(())) => {}
        }
    }

    match result {
        Ok(Ok(())) => {
            tracing::info!("shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "server error");
            Err(e.into())
        }
        Err(e) => {
            tracing::error!(error = %e, "server task failed");
            Err(e.into())
        }
    }
}
