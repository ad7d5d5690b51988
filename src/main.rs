//! Guild Mirror - Discord guild bridge
//!
//! Mirrors the channel tree of a source guild into a destination guild and
//! relays messages and presence events from the source as they happen.

mod bridge;
mod common;
mod config;
mod discord;
mod presence;
mod relay;
mod store;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use common::AppError;
use config::load_and_validate;
use discord::DiscordBotBuilder;
use store::{HttpBlobBackend, MappingStore, RemoteBackend};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Guild Mirror v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_and_validate().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Set GUILD_MIRROR_DISCORD_TOKEN (or DISCORD_TOKEN) in the environment.");
        AppError::from(e)
    })?;

    info!("Configuration loaded successfully");
    info!("  Store: {}", config.store.path.display());
    info!("  Remote copy: {}", if config.store.remote_url.is_some() { "enabled" } else { "disabled" });

    let remote = config.store.remote().map(|remote| -> Arc<dyn RemoteBackend> {
        Arc::new(HttpBlobBackend::new(remote.url, remote.token))
    });
    let store = Arc::new(MappingStore::open(config.store.path.clone(), remote).await);
    info!("{} server pairs loaded ({:?})", store.pair_count().await, store.loaded_from());

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let discord_bot = DiscordBotBuilder::new(config, store.clone(), shutdown_tx.clone())
        .build()
        .await?;

    info!("Starting Discord bot...");
    let mut discord_task = tokio::spawn(async move {
        discord_bot.run().await;
    });

    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - stopping...");
            true
        }
        _ = shutdown_rx.wait_for(|stop| *stop) => {
            info!("Shutdown requested by command - stopping...");
            true
        }
        _ = &mut discord_task => false,
    };

    if shutdown {
        shutdown_tx.send_replace(true);
        match tokio::time::timeout(Duration::from_secs(5), discord_task).await {
            Ok(Ok(())) => info!("Discord client stopped gracefully"),
            Ok(Err(e)) => warn!("Discord task panicked: {}", e),
            Err(_) => warn!("Discord shutdown timed out"),
        }
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
