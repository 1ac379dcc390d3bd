use std::future::IntoFuture;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;

use jobstream_api::{app, config::AppConfig};

/// How long open event streams may hold up shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobstream_observability::init();

    let config = AppConfig::from_env()?;
    let (router, services) = app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stopping_tx.send(true);
        })
        .into_future();

    // Event streams never end on their own; give them a grace period.
    tokio::select! {
        res = server => res?,
        _ = async {
            let _ = stopping_rx.changed().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => tracing::warn!("grace period elapsed; dropping open connections"),
    }

    services.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
