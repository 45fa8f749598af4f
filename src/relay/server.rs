use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;

use super::{router, Relay};
use crate::config::RelayConfig;
use crate::store::RedisStore;

/// Runs the HTTP relay until Ctrl+C or SIGTERM
pub async fn start_server(config: RelayConfig) -> Result<()> {
    info!("Initializing store...");
    let store = RedisStore::open(
        &config.redis_url,
        &config.key_prefix,
        config.session_ttl(),
        config.store_timeout(),
    )
    .context("invalid redis url")?;
    let relay = Relay::new(Arc::new(store));

    info!("Starting relay...");
    let app = router(relay, config.cors_max_age());

    info!("Binding to {}", config.bind);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(
        "Relay running on {} (session ttl {}s)",
        config.bind, config.session_ttl_secs
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server error")?;

    info!("Relay shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
