//! lemon-email-mcp: MCP server on stdin/stdout
//!
//! Reads `LEMON_EMAIL_API_KEY` (required) and `LEMON_EMAIL_API_BASE_URL`.
//! Logs go to stderr.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lemon_email::config::{Config, ENV_API_KEY};
use lemon_email::gateway::EmailGateway;
use lemon_email::logging::{self, LogTarget};
use lemon_email::registry::ToolRegistry;
use lemon_email::rpc::RpcServer;
use lemon_email::{send_email, SERVER_NAME, SERVER_VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LogTarget::Stderr);

    let config = Config::load().context("Failed to load configuration")?;
    let api_key = config
        .api_key()
        .map(str::to_string)
        .with_context(|| format!("{ENV_API_KEY} environment variable is required"))?;

    info!("Starting {SERVER_NAME} MCP server v{SERVER_VERSION}");
    info!("Provider: {}", config.provider.api_base_url);

    let gateway = EmailGateway::new(&config.provider.api_base_url, api_key)
        .with_timeout(config.provider_timeout());

    let mut registry = ToolRegistry::new();
    send_email::register_tools(&mut registry, Arc::new(gateway))?;
    info!("Registered {} tool(s)", registry.tool_count());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    RpcServer::new(Arc::new(registry))
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), cancel)
        .await
        .context("MCP session failed")?;

    info!("{SERVER_NAME} MCP server stopped");
    Ok(())
}
