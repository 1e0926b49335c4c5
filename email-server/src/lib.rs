//! Lemon Email server: one `send_email` capability exposed to AI agents over
//! line-delimited JSON-RPC (MCP) on stdio, and to direct callers over REST.
//!
//! Flow: transport → tool registry (argument validation) → email gateway
//! (single POST to the provider) → reply on the transport that received it.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod logging;
pub mod registry;
pub mod rpc;
pub mod send_email;

/// Name announced to MCP clients in `serverInfo`
pub const SERVER_NAME: &str = "lemon-email";

/// Version announced to MCP clients and on the REST health endpoint
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name reported by `GET /health`
pub const SERVICE_NAME: &str = "lemon-email-mcp-server";
