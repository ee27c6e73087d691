use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;

use super::{
    IntegrationAdapter, IntegrationError, bounded_u64, optional_str, read_json, required_str,
};

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s<>,;]+@[^@\s<>,;]+\.[^@\s<>,;]+$").expect("valid email regex")
});

pub struct GmailAdapter {
    http: reqwest::Client,
    api_base: String,
}

impl GmailAdapter {
    pub fn new(api_base: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

fn header_value<'a>(name: &str, value: &'a str) -> Result<&'a str, IntegrationError> {
    if value.contains(['\r', '\n']) {
        return Err(IntegrationError::InvalidParams(format!(
            "{} must not contain line breaks",
            name
        )));
    }
    Ok(value)
}

fn recipients(name: &str, raw: &str) -> Result<String, IntegrationError> {
    let list: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if list.is_empty() {
        return Err(IntegrationError::InvalidParams(format!("{} is required", name)));
    }
    for addr in &list {
        if !EMAIL_RE.is_match(addr) {
            return Err(IntegrationError::InvalidParams(format!(
                "{} contains an invalid address: {}",
                name, addr
            )));
        }
    }
    Ok(list.join(", "))
}

/// RFC 822 message for `users.messages.send`.
pub(crate) fn build_message(params: &Value) -> Result<String, IntegrationError> {
    let to = recipients("to", required_str(params, "to")?)?;
    let subject = header_value("subject", optional_str(params, "subject").unwrap_or(""))?;
    let body = optional_str(params, "body").unwrap_or("");

    let mut message = format!("To: {}\r\n", to);
    if let Some(cc) = optional_str(params, "cc") {
        message.push_str(&format!("Cc: {}\r\n", recipients("cc", cc)?));
    }
    message.push_str(&format!("Subject: {}\r\n", subject));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n\r\n");
    message.push_str(body);
    Ok(message)
}

#[async_trait]
impl IntegrationAdapter for GmailAdapter {
    fn tool_name(&self) -> &'static str {
        "gmail"
    }

    async fn send(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError> {
        let raw = URL_SAFE_NO_PAD.encode(build_message(params)?);
        let response = self
            .http
            .post(format!("{}/users/me/messages/send", self.api_base))
            .bearer_auth(access_token)
            .json(&json!({ "raw": raw }))
            .send()
            .await?;
        let sent = read_json(response).await?;
        Ok(json!({
            "messageId": sent.get("id").cloned().unwrap_or(Value::Null),
            "threadId": sent.get("threadId").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn fetch(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError> {
        let max_results = bounded_u64(params, "maxResults", 10, 100).to_string();
        let mut query: Vec<(&str, &str)> = vec![("maxResults", max_results.as_str())];
        if let Some(q) = optional_str(params, "query") {
            query.push(("q", q));
        }
        let response = self
            .http
            .get(format!("{}/users/me/messages", self.api_base))
            .bearer_auth(access_token)
            .query(&query)
            .send()
            .await?;
        let listing = read_json(response).await?;
        Ok(json!({
            "messages": listing.get("messages").cloned().unwrap_or_else(|| json!([])),
            "resultSizeEstimate": listing.get("resultSizeEstimate").cloned().unwrap_or(json!(0)),
        }))
    }
}
