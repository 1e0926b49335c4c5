//! lemon-email-web: REST API for direct HTTP callers
//!
//! Binds `LEMON_EMAIL_HOST:PORT` (default 0.0.0.0:8000). The configured
//! credential is optional; callers may pass `api_key` per request.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lemon_email::config::Config;
use lemon_email::gateway::EmailGateway;
use lemon_email::http::{self, AppState};
use lemon_email::logging::{self, LogTarget};
use lemon_email::{SERVER_NAME, SERVER_VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LogTarget::Stdout);

    let config = Config::load().context("Failed to load configuration")?;
    info!("Starting {SERVER_NAME} v{SERVER_VERSION} in web mode");

    let api_key = config.api_key().unwrap_or_default().to_string();
    if api_key.is_empty() {
        warn!("No API key configured; requests must supply api_key");
    }

    let gateway = EmailGateway::new(&config.provider.api_base_url, api_key)
        .with_timeout(config.provider_timeout());
    let state = AppState::new(gateway)?;
    info!("API key configured: {}", state.api_key_configured());

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    http::serve(listener, state, cancel).await
}
