use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    IntegrationAdapter, IntegrationError, bounded_u64, optional_str, read_json, required_str,
};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

pub struct SlackAdapter {
    http: reqwest::Client,
    api_base: String,
}

impl SlackAdapter {
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

/// Slack answers HTTP 200 with `{"ok": false, "error": ...}` on failure.
fn check_envelope(body: Value) -> Result<Value, IntegrationError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let error = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    match error {
        "invalid_auth" | "token_revoked" | "token_expired" | "not_authed" => {
            Err(IntegrationError::TokenExpired("slack".to_string()))
        }
        "ratelimited" => Err(IntegrationError::Upstream {
            status: 429,
            message: error.to_string(),
        }),
        _ => Err(IntegrationError::Upstream {
            status: 200,
            message: error.to_string(),
        }),
    }
}

#[async_trait]
impl IntegrationAdapter for SlackAdapter {
    fn tool_name(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError> {
        let channel = required_str(params, "channel")?;
        let text = required_str(params, "text")?;
        let mut payload = json!({ "channel": channel, "text": text });
        if let Some(thread_ts) = optional_str(params, "threadTs") {
            payload["thread_ts"] = json!(thread_ts);
        }

        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await?;
        let body = check_envelope(read_json(response).await?)?;
        Ok(json!({
            "channel": body.get("channel").cloned().unwrap_or(Value::Null),
            "ts": body.get("ts").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn fetch(&self, access_token: &str, params: &Value) -> Result<Value, IntegrationError> {
        let channel = required_str(params, "channel")?;
        let limit = bounded_u64(params, "limit", 20, 200).to_string();
        let response = self
            .http
            .get(format!("{}/conversations.history", self.api_base))
            .bearer_auth(access_token)
            .query(&[("channel", channel), ("limit", limit.as_str())])
            .send()
            .await?;
        let body = check_envelope(read_json(response).await?)?;
        Ok(json!({
            "messages": body.get("messages").cloned().unwrap_or_else(|| json!([])),
            "hasMore": body.get("has_more").cloned().unwrap_or(json!(false)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_mock_server;
    use axum::extract::Query;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[test]
    fn envelope_errors_are_classified() {
        assert!(check_envelope(json!({ "ok": true })).is_ok());
        assert_eq!(
            check_envelope(json!({ "ok": false, "error": "invalid_auth" }))
                .unwrap_err()
                .code(),
            "TOKEN_EXPIRED"
        );
        assert_eq!(
            check_envelope(json!({ "ok": false, "error": "channel_not_found" }))
                .unwrap_err()
                .to_string(),
            "upstream returned HTTP 200: channel_not_found"
        );
        assert_eq!(
            check_envelope(json!({ "ok": false, "error": "ratelimited" }))
                .unwrap_err()
                .code(),
            "RATE_LIMITED"
        );
    }

    #[tokio::test]
    async fn send_posts_message() {
        let app = Router::new().route(
            "/chat.postMessage",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "ok": true, "channel": body["channel"], "ts": "1700000000.000100" }))
            }),
        );
        let adapter = SlackAdapter::new(Some(spawn_mock_server(app).await));
        let out = adapter
            .send("xoxb", &json!({ "channel": "C123", "text": "hello" }))
            .await
            .unwrap();
        assert_eq!(out["channel"], "C123");
        assert_eq!(out["ts"], "1700000000.000100");
    }

    #[tokio::test]
    async fn send_requires_channel_and_text() {
        let adapter = SlackAdapter::new(Some("http://127.0.0.1:9".into()));
        let err = adapter.send("xoxb", &json!({ "text": "hi" })).await.unwrap_err();
        assert_eq!(err.to_string(), "channel is required");
    }

    #[tokio::test]
    async fn fetch_reads_history() {
        let app = Router::new().route(
            "/conversations.history",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                Json(json!({
                    "ok": true,
                    "messages": [{ "text": format!("{}:{}", q["channel"], q["limit"]) }],
                    "has_more": false
                }))
            }),
        );
        let adapter = SlackAdapter::new(Some(spawn_mock_server(app).await));
        let out = adapter
            .fetch("xoxb", &json!({ "channel": "C1", "limit": 3 }))
            .await
            .unwrap();
        assert_eq!(out["messages"][0]["text"], "C1:3");
        assert_eq!(out["hasMore"], false);
    }
}
