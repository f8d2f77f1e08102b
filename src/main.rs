//! Anonymous 1:1 Stranger Chat Server - Entry Point
//!
//! Loads configuration, starts the Hub actor and accepts WebSocket connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use anon_chat::{handle_connection, Config, Dispatcher, HubHandle, MemoryStore, SystemSwitch};

/// Channel buffer size for hub commands
const CHANNEL_BUFFER_SIZE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=anon_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("anon_chat=info")),
        )
        .init();

    let config = Config::from_env()?;

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;
    info!("Stranger chat server listening on {}", config.addr);
    if config.admin_token.is_none() {
        info!("CHAT_ADMIN_TOKEN not set, admin commands disabled");
    }

    let hub = HubHandle::spawn(CHANNEL_BUFFER_SIZE);
    info!("Hub actor started");

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(MemoryStore::new()),
        hub,
        SystemSwitch::new(config.system_on),
        &config,
    ));

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let dispatcher = dispatcher.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, dispatcher).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
