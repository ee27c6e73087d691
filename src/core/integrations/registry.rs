use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::asana::AsanaAdapter;
use super::gmail::GmailAdapter;
use super::notion::NotionAdapter;
use super::slack::SlackAdapter;
use super::{
    IntegrationAction, IntegrationAdapter, IntegrationError, IntegrationExecutor,
    IntegrationOutcome, IntegrationRequest,
};
use crate::core::config::PortalConfig;
use crate::core::error_handler::ErrorHandler;
use crate::core::oauth::{OAuthError, OAuthService};
use crate::core::store::CredentialRepository;
use crate::core::store::types::CredentialStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub tool: String,
    pub connected: bool,
    pub status: Option<CredentialStatus>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Maps tool names to adapters and runs actions on behalf of a user.
pub struct IntegrationRegistry {
    adapters: HashMap<String, Arc<dyn IntegrationAdapter>>,
    credentials: Arc<dyn CredentialRepository>,
    oauth: Arc<OAuthService>,
    errors: Arc<ErrorHandler>,
}

impl IntegrationRegistry {
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        oauth: Arc<OAuthService>,
        errors: Arc<ErrorHandler>,
    ) -> Self {
        Self {
            adapters: HashMap::new(),
            credentials,
            oauth,
            errors,
        }
    }

    /// Registry with the four built-in adapters, honouring per-tool API base
    /// overrides from the configuration.
    pub fn with_default_adapters(
        config: &PortalConfig,
        credentials: Arc<dyn CredentialRepository>,
        oauth: Arc<OAuthService>,
        errors: Arc<ErrorHandler>,
    ) -> Self {
        let mut registry = Self::new(credentials, oauth, errors);
        registry.register(Arc::new(GmailAdapter::new(
            config.provider("gmail").api_base,
        )));
        registry.register(Arc::new(SlackAdapter::new(
            config.provider("slack").api_base,
        )));
        registry.register(Arc::new(NotionAdapter::new(
            config.provider("notion").api_base,
        )));
        registry.register(Arc::new(AsanaAdapter::new(
            config.provider("asana").api_base,
        )));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn IntegrationAdapter>) {
        info!("Registering integration adapter: {}", adapter.tool_name());
        self.adapters
            .insert(adapter.tool_name().to_string(), adapter);
    }

    pub fn list_adapters(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.adapters.keys().cloned().collect();
        tools.sort();
        tools
    }

    pub fn get_adapter(&self, tool: &str) -> Option<Arc<dyn IntegrationAdapter>> {
        self.adapters.get(tool).cloned()
    }

    pub async fn connection_status(
        &self,
        user_id: &str,
        tool: &str,
    ) -> anyhow::Result<ConnectionStatus> {
        let credential = self.credentials.get_credential(user_id, tool).await?;
        Ok(match credential {
            Some(cred) => ConnectionStatus {
                tool: tool.to_string(),
                connected: cred.status == CredentialStatus::Active,
                status: Some(cred.status),
                scopes: cred.scopes,
                expires_at: cred.expires_at,
            },
            None => ConnectionStatus {
                tool: tool.to_string(),
                connected: false,
                status: None,
                scopes: Vec::new(),
                expires_at: None,
            },
        })
    }

    /// A usable access token for (user, tool). An expired token is refreshed
    /// once when a refresh token exists; a failed refresh marks the
    /// credential as errored.
    async fn access_token(&self, user_id: &str, tool: &str) -> Result<String, IntegrationError> {
        let cred = self
            .credentials
            .get_credential(user_id, tool)
            .await?
            .filter(|c| c.status != CredentialStatus::Revoked && !c.access_token.is_empty())
            .ok_or_else(|| IntegrationError::NotConnected(tool.to_string()))?;

        if cred.status == CredentialStatus::Error {
            return Err(IntegrationError::TokenExpired(tool.to_string()));
        }
        if !cred.is_expired(Utc::now()) {
            return Ok(cred.access_token);
        }

        let Some(refresh_token) = cred.refresh_token.as_deref() else {
            return Err(IntegrationError::TokenExpired(tool.to_string()));
        };
        match self.oauth.refresh_access_token(tool, refresh_token).await {
            Ok(tokens) => {
                self.credentials
                    .update_credential_tokens(
                        user_id,
                        tool,
                        &tokens.access_token,
                        tokens.refresh_token.as_deref(),
                        tokens.expires_at,
                    )
                    .await?;
                info!("Refreshed {} token for user {}", tool, user_id);
                Ok(tokens.access_token)
            }
            Err(e) => {
                warn!("Refreshing {} token for user {} failed: {}", tool, user_id, e);
                self.credentials
                    .set_credential_status(user_id, tool, CredentialStatus::Error)
                    .await?;
                Err(IntegrationError::TokenExpired(tool.to_string()))
            }
        }
    }

    async fn run_action(
        &self,
        adapter: &dyn IntegrationAdapter,
        request: &IntegrationRequest,
    ) -> Result<Value, IntegrationError> {
        let tool = adapter.tool_name();
        match request.action {
            IntegrationAction::Send => {
                let token = self.access_token(&request.user_id, tool).await?;
                adapter.send(&token, &request.params).await
            }
            IntegrationAction::Fetch => {
                let token = self.access_token(&request.user_id, tool).await?;
                adapter.fetch(&token, &request.params).await
            }
            IntegrationAction::Connect => {
                let url = self
                    .oauth
                    .authorization_url(&request.user_id, tool)
                    .await
                    .map_err(|e| match e {
                        OAuthError::Store(inner) => IntegrationError::Internal(inner),
                        other => IntegrationError::InvalidParams(other.to_string()),
                    })?;
                Ok(json!({ "authUrl": url }))
            }
            IntegrationAction::Disconnect => {
                if let Some(cred) = self
                    .credentials
                    .get_credential(&request.user_id, tool)
                    .await?
                {
                    if !cred.access_token.is_empty() {
                        if let Err(e) = self.oauth.revoke_token(tool, &cred.access_token).await {
                            warn!("Upstream revoke for {} failed: {}", tool, e);
                        }
                    }
                }
                let revoked = self
                    .credentials
                    .revoke_credential(&request.user_id, tool)
                    .await?;
                Ok(json!({ "disconnected": revoked }))
            }
            IntegrationAction::IsConnected => {
                let status = self.connection_status(&request.user_id, tool).await?;
                Ok(serde_json::to_value(status).map_err(anyhow::Error::from)?)
            }
        }
    }
}

#[async_trait]
impl IntegrationExecutor for IntegrationRegistry {
    async fn execute_integration(&self, request: IntegrationRequest) -> IntegrationOutcome {
        let Some(adapter) = self.get_adapter(&request.tool) else {
            return IntegrationOutcome::failure(format!(
                "Integration '{}' not found",
                request.tool
            ));
        };

        match self.run_action(adapter.as_ref(), &request).await {
            Ok(data) => IntegrationOutcome::ok(data),
            Err(e) => {
                let message = e.to_string();
                if let Err(record_err) = self
                    .errors
                    .record_error(
                        &request.tool,
                        request.agent_id.as_deref(),
                        e.code(),
                        &message,
                    )
                    .await
                {
                    warn!("Failed to record integration error: {}", record_err);
                }
                IntegrationOutcome::failure(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProviderSettings;
    use crate::core::store::types::NewCredential;
    use crate::core::store::{SqliteStore, test_store};
    use crate::test_support::spawn_mock_server;
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IntegrationAdapter for EchoAdapter {
        fn tool_name(&self) -> &'static str {
            "slack"
        }

        async fn send(&self, token: &str, params: &Value) -> Result<Value, IntegrationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if params.get("fail").is_some() {
                return Err(IntegrationError::Upstream {
                    status: 502,
                    message: "bad gateway".into(),
                });
            }
            Ok(json!({ "token": token, "params": params }))
        }

        async fn fetch(&self, token: &str, _params: &Value) -> Result<Value, IntegrationError> {
            Ok(json!({ "token": token }))
        }
    }

    struct Harness {
        registry: IntegrationRegistry,
        store: Arc<SqliteStore>,
        adapter: Arc<EchoAdapter>,
    }

    fn harness(token_base: Option<&str>) -> Harness {
        let mut cfg = PortalConfig::default();
        cfg.providers.insert(
            "slack".into(),
            ProviderSettings {
                client_id: "cid".into(),
                client_secret: "secret".into(),
                token_url: token_base.map(|b| format!("{}/token", b)),
                revoke_url: token_base.map(|b| format!("{}/revoke", b)),
                ..Default::default()
            },
        );
        let store = test_store();
        let oauth = Arc::new(OAuthService::new(
            Arc::new(cfg),
            store.clone(),
            store.clone(),
        ));
        let errors = Arc::new(ErrorHandler::new(store.clone(), store.clone()));
        let mut registry = IntegrationRegistry::new(store.clone(), oauth, errors);
        let adapter = Arc::new(EchoAdapter {
            calls: AtomicUsize::new(0),
        });
        registry.register(adapter.clone());
        Harness {
            registry,
            store,
            adapter,
        }
    }

    fn request(action: IntegrationAction, params: Value) -> IntegrationRequest {
        IntegrationRequest {
            tool: "slack".into(),
            action,
            params,
            user_id: "alice".into(),
            agent_id: Some("agent-1".into()),
        }
    }

    async fn connect(store: &SqliteStore, expires_at: Option<DateTime<Utc>>) {
        store
            .upsert_credential(&NewCredential {
                user_id: "alice".into(),
                tool_name: "slack".into(),
                access_token: "xoxb-live".into(),
                refresh_token: Some("refresh".into()),
                expires_at,
                scopes: vec!["chat:write".into()],
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_tool_fails_without_raising() {
        let h = harness(None);
        let mut req = request(IntegrationAction::Send, json!({}));
        req.tool = "dropbox".into();
        let out = h.registry.execute_integration(req).await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("Integration 'dropbox' not found"));
    }

    #[test]
    fn default_registry_lists_sorted_tools() {
        let store = test_store();
        let cfg = Arc::new(PortalConfig::default());
        let oauth = Arc::new(OAuthService::new(cfg.clone(), store.clone(), store.clone()));
        let errors = Arc::new(ErrorHandler::new(store.clone(), store.clone()));
        let registry =
            IntegrationRegistry::with_default_adapters(&cfg, store.clone(), oauth, errors);
        assert_eq!(
            registry.list_adapters(),
            vec!["asana", "gmail", "notion", "slack"]
        );
        assert!(registry.get_adapter("gmail").is_some());
        assert!(registry.get_adapter("trello").is_none());
    }

    #[tokio::test]
    async fn send_without_credential_records_error() {
        let h = harness(None);
        let out = h
            .registry
            .execute_integration(request(IntegrationAction::Send, json!({})))
            .await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("slack is not connected"));
        assert_eq!(h.adapter.calls.load(Ordering::SeqCst), 0);

        let errors = h.registry.errors.list_errors(10, None, false).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, "NOT_CONNECTED");
        assert_eq!(errors[0].agent_id.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn send_uses_stored_token() {
        let h = harness(None);
        connect(&h.store, Some(Utc::now() + Duration::hours(1))).await;
        let out = h
            .registry
            .execute_integration(request(IntegrationAction::Send, json!({ "text": "hi" })))
            .await;
        assert!(out.success);
        let data = out.data.unwrap();
        assert_eq!(data["token"], "xoxb-live");
        assert_eq!(data["params"]["text"], "hi");
    }

    #[tokio::test]
    async fn adapter_failure_is_returned_once_and_recorded() {
        let h = harness(None);
        connect(&h.store, None).await;
        let out = h
            .registry
            .execute_integration(request(IntegrationAction::Send, json!({ "fail": true })))
            .await;
        assert!(!out.success);
        assert_eq!(h.adapter.calls.load(Ordering::SeqCst), 1);
        let errors = h.registry.errors.list_errors(10, Some("slack"), false).await.unwrap();
        assert_eq!(errors[0].error_code, "UPSTREAM_ERROR");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_before_call() {
        let app = Router::new().route(
            "/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(form["grant_type"], "refresh_token");
                Json(json!({ "access_token": "xoxb-fresh", "expires_in": 3600 }))
            }),
        );
        let base = spawn_mock_server(app).await;
        let h = harness(Some(&base));
        connect(&h.store, Some(Utc::now() - Duration::minutes(1))).await;

        let out = h
            .registry
            .execute_integration(request(IntegrationAction::Fetch, json!({})))
            .await;
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.data.unwrap()["token"], "xoxb-fresh");

        let cred = h.store.get_credential("alice", "slack").await.unwrap().unwrap();
        assert_eq!(cred.access_token, "xoxb-fresh");
        assert_eq!(cred.refresh_token.as_deref(), Some("refresh"));
        assert!(!cred.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn failed_refresh_marks_credential_errored() {
        let app = Router::new().route(
            "/token",
            post(|| async { Json(json!({ "error": "invalid_grant" })) }),
        );
        let base = spawn_mock_server(app).await;
        let h = harness(Some(&base));
        connect(&h.store, Some(Utc::now() - Duration::minutes(1))).await;

        let out = h
            .registry
            .execute_integration(request(IntegrationAction::Send, json!({})))
            .await;
        assert!(!out.success);
        assert_eq!(h.adapter.calls.load(Ordering::SeqCst), 0);
        let cred = h.store.get_credential("alice", "slack").await.unwrap().unwrap();
        assert_eq!(cred.status, CredentialStatus::Error);

        let status = h.registry.connection_status("alice", "slack").await.unwrap();
        assert!(!status.connected);
    }

    #[tokio::test]
    async fn disconnect_revokes_and_wipes_credential() {
        let revoked = Arc::new(AtomicUsize::new(0));
        let counter = revoked.clone();
        let app = Router::new().route(
            "/revoke",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "ok": true }))
                }
            }),
        );
        let base = spawn_mock_server(app).await;
        let h = harness(Some(&base));
        connect(&h.store, None).await;

        let out = h
            .registry
            .execute_integration(request(IntegrationAction::Disconnect, json!({})))
            .await;
        assert!(out.success);
        assert_eq!(out.data.unwrap()["disconnected"], true);
        assert_eq!(revoked.load(Ordering::SeqCst), 1);

        let status = h
            .registry
            .execute_integration(request(IntegrationAction::IsConnected, json!({})))
            .await
            .data
            .unwrap();
        assert_eq!(status["connected"], false);
        assert_eq!(status["status"], "revoked");

        let send = h
            .registry
            .execute_integration(request(IntegrationAction::Send, json!({})))
            .await;
        assert_eq!(send.error.as_deref(), Some("slack is not connected"));
    }

    #[tokio::test]
    async fn connect_returns_authorization_url() {
        let h = harness(None);
        let out = h
            .registry
            .execute_integration(request(IntegrationAction::Connect, json!({})))
            .await;
        assert!(out.success);
        let url = out.data.unwrap()["authUrl"].as_str().unwrap().to_string();
        assert!(url.starts_with("https://slack.com/oauth/v2/authorize?"));
        assert!(url.contains("client_id=cid"));
    }

    #[tokio::test]
    async fn is_connected_reports_scopes() {
        let h = harness(None);
        connect(&h.store, None).await;
        let out = h
            .registry
            .execute_integration(request(IntegrationAction::IsConnected, json!({})))
            .await;
        let data = out.data.unwrap();
        assert_eq!(data["connected"], true);
        assert_eq!(data["status"], "active");
        assert_eq!(data["scopes"][0], "chat:write");
    }
}
