use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skyliner_server::{create_router, spawn_hub, AppState, Args, HubHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_filter = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("skyliner_server={},tower_http=info", log_filter).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.into_config();
    config.validate()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        outbound_capacity = config.outbound_capacity,
        command_capacity = config.command_capacity,
        "starting skyliner real-time server"
    );

    let (hub, hub_task) = spawn_hub(&config);
    let app = create_router(AppState::new(hub.clone(), config.clone()));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("WebSocket endpoint at ws://{}/ws", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await?;

    hub_task.await?;
    tracing::info!("server shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C, then close every client session.
async fn shutdown_signal(hub: HubHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("received shutdown signal");
    hub.shutdown().await;
}
