//! Pong Session Server - Authoritative real-time Pong server
//!
//! This is the main entry point for the session server. It handles:
//! - WebSocket connections for matchmaking, gameplay and tournaments
//! - HTTP endpoints for queueing, direct game requests and tournament creation
//! - Forwarding finished matches and tournaments to the results service

mod app;
mod config;
mod game;
mod http;
mod matchmaking;
mod store;
mod tournament;
mod util;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::store::{run_reporter, ResultReporter, ResultsClient};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Pong Session Server");
    info!("Server address: {}", config.server_addr);
    info!(
        tick_rate = config.game.tick_rate,
        win_threshold = config.game.win_threshold,
        tournament_win_threshold = config.game.tournament_win_threshold,
        "Game settings loaded"
    );

    // Results go out on their own task so sessions never wait on the network
    let (reporter, reports) = ResultReporter::channel();
    let client = config.results_url.clone().map(ResultsClient::new);
    if client.is_none() {
        warn!("RESULTS_URL not set, results will only be logged");
    }
    tokio::spawn(run_reporter(reports, client));

    let addr: SocketAddr = config.server_addr;

    // Create application state
    let state = AppState::new(config, reporter);

    // Spawn matchmaking sweeper (expires stale game requests)
    let matchmaking = state.matchmaking.clone();
    tokio::spawn(async move {
        matchmaking.run().await;
    });

    // Build router
    let router = build_router(state);

    // Start server
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Matchmaking socket: ws://{}/ws/matchmaking", addr);
    info!("Game socket: ws://{}/ws/pong/:game_id", addr);
    info!("Tournament socket: ws://{}/ws/tournament", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
