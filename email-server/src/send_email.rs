//! send_email: the one tool this server offers

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::error::MailError;
use crate::gateway::{EmailGateway, SendRequest, DEFAULT_FROM_NAME, DEFAULT_TAG};
use crate::registry::{
    HandlerFuture, ParamDefault, ParamKind, ParamSpec, ToolDescriptor, ToolHandler, ToolOutcome,
    ToolRegistry,
};

pub const TOOL_NAME: &str = "send_email";

/// Tag applied to REST sends that omit one
pub const WEB_TAG: &str = "web-api";

pub static DESCRIPTOR: ToolDescriptor = ToolDescriptor {
    name: TOOL_NAME,
    description: "Send an email using the Lemon Email service. \
                  This tool allows AI agents to send transactional emails.",
    fault_prefix: "Error sending email",
    params: &[
        ParamSpec {
            name: "to",
            kind: ParamKind::String,
            description: "Recipient email address",
            required: true,
            default: ParamDefault::None,
        },
        ParamSpec {
            name: "subject",
            kind: ParamKind::String,
            description: "Email subject line",
            required: true,
            default: ParamDefault::None,
        },
        ParamSpec {
            name: "body",
            kind: ParamKind::String,
            description: "Email body content",
            required: true,
            default: ParamDefault::None,
        },
        ParamSpec {
            name: "fromemail",
            kind: ParamKind::String,
            description: "Sender email address (required)",
            required: true,
            default: ParamDefault::None,
        },
        ParamSpec {
            name: "fromname",
            kind: ParamKind::String,
            description: "Sender name",
            required: false,
            default: ParamDefault::Str(DEFAULT_FROM_NAME),
        },
        ParamSpec {
            name: "toname",
            kind: ParamKind::String,
            description: "Recipient name",
            required: false,
            default: ParamDefault::Str(""),
        },
        ParamSpec {
            name: "tag",
            kind: ParamKind::String,
            description: "Email tag for tracking",
            required: false,
            default: ParamDefault::Str(DEFAULT_TAG),
        },
        ParamSpec {
            name: "variables",
            kind: ParamKind::Object,
            description: "Template variables (key-value pairs)",
            required: false,
            default: ParamDefault::EmptyObject,
        },
        ParamSpec {
            name: "replyto",
            kind: ParamKind::String,
            description: "Reply-to email address (defaults to fromemail)",
            required: false,
            default: ParamDefault::None,
        },
    ],
};

/// Register send_email, bound to the given gateway
pub fn register_tools(reg: &mut ToolRegistry, gateway: Arc<EmailGateway>) -> Result<(), MailError> {
    let handler: ToolHandler = Arc::new(move |args: Value| -> HandlerFuture {
        let gateway = gateway.clone();
        Box::pin(async move { execute(&gateway, args).await })
    });
    reg.register_tool(&DESCRIPTOR, handler)
}

/// Send with already-validated arguments and describe the result for an agent
pub async fn execute(gateway: &EmailGateway, args: Value) -> ToolOutcome {
    let request = match SendRequest::from_arguments(args) {
        Ok(request) => request,
        Err(e) => return DESCRIPTOR.fault(e),
    };

    match gateway.send(&request).await {
        Ok(delivery) => ToolOutcome::success(format!(
            "Email sent successfully\nStatus: {}\nResponse: {}",
            delivery.status_code, delivery.response
        )),
        Err(e) => {
            warn!("send_email to {} failed: {e}", request.to);
            ToolOutcome::failure(format!("Email failed: {e}"))
        }
    }
}

/// Static capability summary served on `GET /mcp-info`
pub fn mcp_info() -> Value {
    json!({
        "mcp_server": {
            "name": crate::SERVER_NAME,
            "version": crate::SERVER_VERSION,
            "description": "Send emails via Lemon Email API",
            "protocol": "Model Context Protocol (MCP)",
            "transport": "stdio (line-delimited JSON-RPC 2.0)",
            "tools": [{
                "name": DESCRIPTOR.name,
                "description": "Send transactional emails",
                "required_params": DESCRIPTOR.required().collect::<Vec<_>>(),
                "optional_params": DESCRIPTOR.optional().collect::<Vec<_>>(),
            }],
        },
        "integration_notes": [
            "This process serves the REST API; run lemon-email-mcp for MCP over stdio",
            "POST /send-email accepts an api_key field or falls back to LEMON_EMAIL_API_KEY",
        ],
    })
}
