//! Buffer Relay Server - Main Entry Point
//!
//! Runs the HTTP ingress and the batch worker in one process.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use buffer_relay::{api, config, queue, relay};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buffer_relay=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Buffer Relay Server"
    );

    // Producer and worker get separate Redis connections: BRPOP blocks its connection
    let producer_redis = queue::create_redis_client(&config.redis_url).await?;
    let worker_redis = queue::create_redis_client(&config.redis_url).await?;

    // Initialize webhook relay
    let webhook = relay::WebhookClient::from_config(&config)
        .context("Failed to build webhook HTTP client")?;
    let batch_relay = relay::BatchRelay::new(webhook);
    info!(url = %config.external_webhook_url, "Webhook relay initialized");

    // Start batch worker
    let shutdown = CancellationToken::new();
    let worker = queue::spawn_batch_worker(
        worker_redis,
        config.queue.clone(),
        batch_relay,
        shutdown.clone(),
    );

    // Build application state
    let message_queue = Arc::new(queue::RedisQueue::new(producer_redis, &config.queue));
    let state = api::AppState::new(config.clone(), message_queue);

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Stop the worker and let it flush its buffer
    shutdown.cancel();
    if let Err(e) = worker.await {
        tracing::error!("Batch worker task failed: {}", e);
    }

    info!("Server shutdown complete");

    Ok(())
}
