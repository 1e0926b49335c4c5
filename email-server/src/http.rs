//! REST API: `POST /send-email`, `GET /health`, `GET /mcp-info`

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::MailError;
use crate::gateway::{EmailGateway, SendRequest};
use crate::registry::ToolRegistry;
use crate::send_email::{self, TOOL_NAME, WEB_TAG};

/// Shared, read-only state for REST handlers
#[derive(Clone)]
pub struct AppState {
    registry: Arc<ToolRegistry>,
    /// Gateway bound to the configured credential, possibly empty
    gateway: Arc<EmailGateway>,
}

impl AppState {
    pub fn new(gateway: EmailGateway) -> Result<Self, MailError> {
        let gateway = Arc::new(gateway);
        let mut registry = ToolRegistry::new();
        send_email::register_tools(&mut registry, gateway.clone())?;
        Ok(Self {
            registry: Arc::new(registry),
            gateway,
        })
    }

    pub fn api_key_configured(&self) -> bool {
        self.gateway.has_api_key()
    }
}

/// Error body: `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<MailError> for ApiError {
    fn from(err: MailError) -> Self {
        let status = if err.is_validation() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else if err.is_upstream() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub success: bool,
    pub message: String,
    pub status_code: u16,
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub mode: String,
    pub api_key_configured: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/send-email", post(send_email_handler))
        .route("/health", get(health_check))
        .route("/mcp-info", get(mcp_info))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the REST API until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("REST API listening on http://{addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("REST API stopped");
    Ok(())
}

async fn send_email_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SendEmailResponse>, ApiError> {
    let Json(body) = payload
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.body_text()))?;
    let Value::Object(mut fields) = body else {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Request body must be a JSON object",
        ));
    };

    let api_key = match fields.remove("api_key") {
        Some(Value::String(key)) if !key.trim().is_empty() => Some(key),
        Some(Value::String(_)) | Some(Value::Null) | None => None,
        Some(_) => {
            return Err(ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "api_key must be a string",
            ))
        }
    };

    if fields.get("tag").map_or(true, Value::is_null) {
        fields.insert("tag".into(), Value::String(WEB_TAG.into()));
    }

    let arguments = state.registry.prepare(TOOL_NAME, Value::Object(fields))?;
    let request = SendRequest::from_arguments(arguments)?;

    let gateway = match api_key {
        Some(key) => state.gateway.with_api_key(key),
        None if state.api_key_configured() => (*state.gateway).clone(),
        None => {
            return Err(MailError::NotConfigured(
                "provide api_key or set LEMON_EMAIL_API_KEY".into(),
            )
            .into())
        }
    };

    let delivery = gateway.send(&request).await?;
    Ok(Json(SendEmailResponse {
        success: true,
        message: "Email sent successfully".into(),
        status_code: delivery.status_code,
        response: delivery.response,
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        service: crate::SERVICE_NAME.into(),
        version: crate::SERVER_VERSION.into(),
        mode: "web".into(),
        api_key_configured: state.api_key_configured(),
    })
}

async fn mcp_info() -> Json<Value> {
    Json(send_email::mcp_info())
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    warn!("REST handler panicked: {detail}");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to send email: {detail}"),
    )
    .into_response()
}
