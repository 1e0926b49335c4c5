//! Error taxonomy for email sending and tool invocation

use thiserror::Error;

/// Everything that can go wrong between accepting arguments and hearing back
/// from the provider. The `Display` text is the user-facing failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    /// Required fields absent or empty; never reaches the network
    #[error("Missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },

    /// Arguments present but of the wrong shape
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Provider answered with a non-2xx status
    #[error("API error {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("timed out after {secs} seconds")]
    Timeout { secs: u64 },

    /// DNS, connection refused, TLS and other transport faults
    #[error("network error: {0}")]
    Network(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// No credential available to call the provider with
    #[error("Email service not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Internal(String),
}

impl MailError {
    /// True for failures caused by the caller's input rather than the provider
    pub fn is_validation(&self) -> bool {
        matches!(self, MailError::Validation { .. } | MailError::InvalidArguments(_))
    }

    /// True for failures reported by, or on the way to, the provider
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            MailError::Provider { .. } | MailError::Timeout { .. } | MailError::Network(_)
        )
    }
}
