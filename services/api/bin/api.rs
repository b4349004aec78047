//! Main Entrypoint for the Wanda API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the upstream clients.
//! 3. Constructing the Axum router.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{info, warn};
use wanda_api::{
    config::Config,
    router::create_router,
    state::AppState,
    upstream::{HttpKnowledgeBase, HttpRealtimeSessions},
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Upstream Clients ---
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let knowledge_base = HttpKnowledgeBase::new(
        client.clone(),
        &config.wanda_api_url,
        config.wanda_api_token.clone(),
    )?;
    let realtime_sessions = HttpRealtimeSessions::new(
        client,
        config.realtime_sessions_url.clone(),
        config.openai_api_key.clone(),
        config.realtime_model.clone(),
        config.realtime_voice.clone(),
    );

    let app_state = Arc::new(AppState {
        knowledge_base: Arc::new(knowledge_base),
        realtime_sessions: Arc::new(realtime_sessions),
    });

    // --- 4. Create Router ---
    let app = create_router(app_state);

    // --- 5. Start Server ---
    info!(
        model = %config.realtime_model,
        voice = %config.realtime_voice,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
