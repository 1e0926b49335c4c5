//! Tracing subscriber setup shared by both binaries

use tracing_subscriber::EnvFilter;

/// Set to `json` for structured log lines
pub const ENV_LOG_FORMAT: &str = "LEMON_EMAIL_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    /// Required in stdio MCP mode, where stdout carries protocol lines
    Stderr,
}

/// Install the global subscriber. Filter comes from `RUST_LOG`, default `info`.
pub fn init(target: LogTarget) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_ansi(target == LogTarget::Stdout);

    match (target, json) {
        (LogTarget::Stdout, false) => builder.compact().init(),
        (LogTarget::Stdout, true) => builder.json().init(),
        (LogTarget::Stderr, false) => builder.with_writer(std::io::stderr).compact().init(),
        (LogTarget::Stderr, true) => builder.with_writer(std::io::stderr).json().init(),
    }
}
