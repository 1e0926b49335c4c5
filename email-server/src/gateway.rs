//! Email gateway: one POST to the Lemon Email transactional API per send

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::MailError;

/// Header carrying the provider credential
pub const API_KEY_HEADER: &str = "X-Auth-APIKey";

/// Path appended to the configured base URL
pub const SEND_PATH: &str = "/transactional/send";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_FROM_NAME: &str = "Email Assistant";

/// Tag used when an agent does not supply one
pub const DEFAULT_TAG: &str = "mcp-agent";

/// A single transactional email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default = "default_from_name")]
    pub fromname: String,
    pub fromemail: String,
    #[serde(default)]
    pub toname: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Template variables
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub replyto: Option<String>,
}

fn default_from_name() -> String {
    DEFAULT_FROM_NAME.to_string()
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

impl SendRequest {
    /// Build from already-validated tool arguments
    pub fn from_arguments(arguments: Value) -> Result<Self, MailError> {
        serde_json::from_value(arguments).map_err(|e| MailError::InvalidArguments(e.to_string()))
    }

    /// Reply-to address, falling back to the sender when absent or empty
    pub fn reply_to(&self) -> &str {
        match self.replyto.as_deref() {
            Some(addr) if !addr.is_empty() => addr,
            _ => &self.fromemail,
        }
    }

    fn payload(&self) -> ProviderPayload<'_> {
        ProviderPayload {
            fromname: &self.fromname,
            fromemail: &self.fromemail,
            to: &self.to,
            toname: &self.toname,
            subject: &self.subject,
            body: &self.body,
            tag: &self.tag,
            variables: &self.variables,
            replyto: self.reply_to(),
        }
    }
}

/// Request body expected by the provider
#[derive(Serialize)]
struct ProviderPayload<'a> {
    fromname: &'a str,
    fromemail: &'a str,
    to: &'a str,
    toname: &'a str,
    subject: &'a str,
    body: &'a str,
    tag: &'a str,
    variables: &'a Map<String, Value>,
    replyto: &'a str,
}

/// Provider acceptance: status code and the raw response text, unparsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub status_code: u16,
    pub response: String,
}

/// Outcome of a send: either the provider accepted it or it did not
pub type SendResult = Result<Delivery, MailError>;

/// Client for the provider's transactional endpoint. Each instance is bound to
/// the credential it was built with.
#[derive(Clone)]
pub struct EmailGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl EmailGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same endpoint and connection pool, different credential
    pub fn with_api_key(&self, api_key: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: api_key.into(),
            timeout: self.timeout,
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), SEND_PATH)
    }

    /// Send one email. Never retries; any failure is terminal for this call.
    pub async fn send(&self, request: &SendRequest) -> SendResult {
        let url = self.endpoint();
        info!("Sending email to {} (tag: {})", request.to, request.tag);

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request.payload())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        let latency = start.elapsed().as_millis();

        if !status.is_success() {
            warn!("Provider rejected email to {}: {} ({latency}ms)", request.to, status);
            return Err(MailError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        info!("Provider accepted email to {}: {} ({latency}ms)", request.to, status);
        Ok(Delivery {
            status_code: status.as_u16(),
            response: body,
        })
    }

    fn classify(&self, err: reqwest::Error) -> MailError {
        if err.is_timeout() {
            let secs = whole_secs(self.timeout);
            warn!("Provider call timed out after {secs}s");
            MailError::Timeout { secs }
        } else {
            let message = error_chain(&err);
            warn!("Provider call failed: {message}");
            MailError::Network(message)
        }
    }
}

/// Seconds rounded up, so sub-second timeouts never read as zero
fn whole_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs();
    if timeout.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Render an error with its sources, e.g. "error sending request: connection refused"
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
