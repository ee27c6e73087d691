pub mod asana;
pub mod gmail;
pub mod notion;
mod registry;
pub mod slack;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::{ConnectionStatus, IntegrationRegistry};

/// Tools with a built-in adapter and OAuth provider.
pub const KNOWN_TOOLS: &[&str] = &["asana", "gmail", "notion", "slack"];

#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error("{0} is not connected")]
    NotConnected(String),
    #[error("{0} credentials have expired; reconnect the integration")]
    TokenExpired(String),
    #[error("{0}")]
    InvalidParams(String),
    #[error("upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntegrationError {
    /// Stable code stored with the error record.
    pub fn code(&self) -> &'static str {
        match self {
            IntegrationError::NotConnected(_) => "NOT_CONNECTED",
            IntegrationError::TokenExpired(_) => "TOKEN_EXPIRED",
            IntegrationError::InvalidParams(_) => "INVALID_PARAMS",
            IntegrationError::Upstream { status: 401, .. }
            | IntegrationError::Upstream { status: 403, .. } => "AUTH_FAILED",
            IntegrationError::Upstream { status: 429, .. } => "RATE_LIMITED",
            IntegrationError::Upstream { .. } => "UPSTREAM_ERROR",
            IntegrationError::Transport(_) => "NETWORK_ERROR",
            IntegrationError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntegrationAction {
    Send,
    Fetch,
    Connect,
    Disconnect,
    IsConnected,
}

impl IntegrationAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "send" => Some(IntegrationAction::Send),
            "fetch" => Some(IntegrationAction::Fetch),
            "connect" => Some(IntegrationAction::Connect),
            "disconnect" => Some(IntegrationAction::Disconnect),
            "isConnected" => Some(IntegrationAction::IsConnected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntegrationRequest {
    pub tool: String,
    pub action: IntegrationAction,
    pub params: Value,
    pub user_id: String,
    pub agent_id: Option<String>,
}

/// Result envelope returned to callers; failures never raise.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntegrationOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// One third-party tool behind the uniform send/fetch contract. Adapters
/// receive a ready access token; credential handling lives in the registry.
#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    fn tool_name(&self) -> &'static str;

    async fn send(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError>;

    async fn fetch(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError>;
}

/// Entry point the scheduler runs tasks through.
#[async_trait]
pub trait IntegrationExecutor: Send + Sync {
    async fn execute_integration(&self, request: IntegrationRequest) -> IntegrationOutcome;
}

pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, IntegrationError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IntegrationError::InvalidParams(format!("{} is required", key)))
}

pub(crate) fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Reads a positive integer parameter, accepting numbers or numeric strings.
pub(crate) fn bounded_u64(params: &Value, key: &str, default: u64, max: u64) -> u64 {
    let raw = match params.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    raw.filter(|v| *v > 0).unwrap_or(default).min(max)
}

/// Turn a provider response into JSON, mapping non-2xx statuses to
/// [`IntegrationError::Upstream`].
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, IntegrationError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| upstream_message(&v))
            .unwrap_or_else(|| truncate(&body, 300));
        return Err(IntegrationError::Upstream {
            status: status.as_u16(),
            message,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| IntegrationError::Upstream {
        status: status.as_u16(),
        message: format!("unparseable response: {}", e),
    })
}

fn upstream_message(body: &Value) -> Option<String> {
    if let Some(msg) = body.pointer("/error/message").and_then(Value::as_str) {
        return Some(msg.to_string());
    }
    if let Some(msg) = body.get("message").and_then(Value::as_str) {
        return Some(msg.to_string());
    }
    if let Some(msg) = body.pointer("/errors/0/message").and_then(Value::as_str) {
        return Some(msg.to_string());
    }
    body.get("error").and_then(Value::as_str).map(str::to_string)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
