mod backend;
mod bot;
mod config;
mod http;
mod models;
mod platform;
mod poll;
mod state;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64};

use crate::backend::BackendClient;
use crate::bot::BotRouter;
use crate::bot::poller::UpdatePoller;
use crate::config::BotConfig;
use crate::platform::telegram::TelegramClient;
use crate::poll::PollService;
use crate::state::AppState;
use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = BotConfig::load().context("Failed to load configuration")?;

    let backend = BackendClient::new(
        &config.backend.url,
        config.backend.request_timeout(),
        config.backend.poll_creation_timeout(),
    )
    .context("Failed to initialize backend client")?;
    let telegram = TelegramClient::new(
        &config.telegram.api_url,
        &config.telegram.token,
        config.telegram.request_timeout(),
    )
    .context("Failed to initialize Telegram client")?;

    let service = Arc::new(PollService::new(
        Arc::new(backend.clone()),
        Arc::new(telegram.clone()),
        &config.backend.platform,
        &config.drafts,
        &config.sync,
    ));
    let router = Arc::new(BotRouter::new(Arc::clone(&service), Arc::new(telegram.clone())));

    let last_update_id = Arc::new(AtomicU64::new(0));
    let last_poll_at = Arc::new(AtomicI64::new(0));
    let app_state = AppState::new(
        Arc::clone(&service),
        Arc::clone(&last_update_id),
        Arc::clone(&last_poll_at),
        backend.timeout(),
        config.telegram.staleness_threshold(),
    );

    let poller = UpdatePoller::new(
        telegram,
        router,
        config.telegram.clone(),
        Arc::clone(&last_update_id),
        Arc::clone(&last_poll_at),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_handle = tokio::spawn(async move {
        if let Err(err) = poller.run(shutdown_rx).await {
            error!("Update poller terminated with error: {err}");
        }
    });

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("Guild poll bot health endpoint listening on {local_addr}");

    let router: Router = http::router(app_state);
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Err(join_err) = poller_handle.await {
        error!("Update poller task join error: {join_err}");
    }

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
