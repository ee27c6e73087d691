pub mod providers;

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::config::PortalConfig;
use crate::core::store::types::{NewCredential, OAuthStateRecord};
use crate::core::store::{CredentialRepository, OAuthStateRepository};

pub use providers::{ResolvedProvider, TokenAuthStyle, provider_definition};

const CSRF_TOKEN_LEN: usize = 32;
const CSRF_TTL_MINUTES: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Integration '{0}' not found")]
    UnknownTool(String),
    #[error("OAuth client for '{0}' is not configured")]
    NotConfigured(String),
    #[error("invalid provider endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("token endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("OAuth error: {0}")]
    Provider(String),
    #[error("token response did not include an access token")]
    MissingAccessToken,
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Tokens returned by a code exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    /// Slack wraps every response in an `ok` envelope.
    ok: Option<bool>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatePayload {
    csrf: String,
    tool: String,
    user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedState {
    pub user_id: Option<String>,
    pub tool: Option<String>,
    pub is_valid: bool,
}

impl ParsedState {
    fn invalid() -> Self {
        Self {
            user_id: None,
            tool: None,
            is_valid: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub fn generate_csrf_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CSRF_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Authorization-code flow against the supported providers. Owns the CSRF
/// state lifecycle and writes the resulting credential.
pub struct OAuthService {
    config: Arc<PortalConfig>,
    states: Arc<dyn OAuthStateRepository>,
    credentials: Arc<dyn CredentialRepository>,
    http: reqwest::Client,
}

impl OAuthService {
    pub fn new(
        config: Arc<PortalConfig>,
        states: Arc<dyn OAuthStateRepository>,
        credentials: Arc<dyn CredentialRepository>,
    ) -> Self {
        Self {
            config,
            states,
            credentials,
            http: reqwest::Client::new(),
        }
    }

    pub fn provider(&self, tool: &str) -> Result<ResolvedProvider, OAuthError> {
        let definition =
            provider_definition(tool).ok_or_else(|| OAuthError::UnknownTool(tool.to_string()))?;
        Ok(ResolvedProvider::resolve(
            definition,
            &self.config.provider(tool),
        ))
    }

    /// Issue a CSRF token for a new flow. Abandoned flows are purged here.
    pub async fn create_csrf_token(&self, user_id: &str, tool: &str) -> Result<String> {
        let purged = self.states.purge_expired_oauth_states(Utc::now()).await?;
        if purged > 0 {
            info!("Purged {} expired OAuth state(s)", purged);
        }
        let token = generate_csrf_token();
        self.states
            .insert_oauth_state(&OAuthStateRecord {
                csrf_token: token.clone(),
                user_id: user_id.to_string(),
                tool_name: tool.to_string(),
                expires_at: Utc::now() + Duration::minutes(CSRF_TTL_MINUTES),
            })
            .await?;
        Ok(token)
    }

    /// True only for an unexpired token bound to this user and tool. The
    /// token is consumed on success.
    pub async fn validate_csrf_token(&self, token: &str, user_id: &str, tool: &str) -> Result<bool> {
        self.states
            .take_oauth_state(token, user_id, tool, Utc::now())
            .await
    }

    pub async fn create_oauth_state(&self, user_id: &str, tool: &str) -> Result<String> {
        let csrf = self.create_csrf_token(user_id, tool).await?;
        let payload = serde_json::to_vec(&StatePayload {
            csrf,
            tool: tool.to_string(),
            user_id: user_id.to_string(),
        })?;
        Ok(URL_SAFE_NO_PAD.encode(payload))
    }

    pub async fn parse_oauth_state(&self, state: &str) -> Result<ParsedState> {
        let payload = match URL_SAFE_NO_PAD
            .decode(state.trim_end_matches('='))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<StatePayload>(&bytes).ok())
        {
            Some(p) => p,
            None => return Ok(ParsedState::invalid()),
        };
        let is_valid = self
            .validate_csrf_token(&payload.csrf, &payload.user_id, &payload.tool)
            .await?;
        Ok(ParsedState {
            user_id: Some(payload.user_id),
            tool: Some(payload.tool),
            is_valid,
        })
    }

    pub async fn authorization_url(&self, user_id: &str, tool: &str) -> Result<String, OAuthError> {
        let provider = self.provider(tool)?;
        if provider.client_id.is_empty() {
            return Err(OAuthError::NotConfigured(tool.to_string()));
        }
        let mut url = url::Url::parse(&provider.auth_url)
            .map_err(|_| OAuthError::InvalidEndpoint(provider.auth_url.clone()))?;
        let state = self.create_oauth_state(user_id, tool).await?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &provider.client_id)
                .append_pair("redirect_uri", &self.config.oauth_redirect_uri())
                .append_pair("response_type", "code");
            if !provider.scopes.is_empty() {
                query.append_pair("scope", &provider.scopes.join(provider.scope_separator));
            }
            for (key, value) in provider.extra_auth_params {
                query.append_pair(key, value);
            }
            query.append_pair("state", &state);
        }
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, tool: &str, code: &str) -> Result<TokenSet, OAuthError> {
        let provider = self.configured_provider(tool)?;
        let redirect_uri = self.config.oauth_redirect_uri();
        self.request_token(
            &provider,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &redirect_uri),
            ],
        )
        .await
    }

    pub async fn refresh_access_token(
        &self,
        tool: &str,
        refresh_token: &str,
    ) -> Result<TokenSet, OAuthError> {
        let provider = self.configured_provider(tool)?;
        self.request_token(
            &provider,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    /// Revoke a token upstream. Providers without a revocation endpoint are
    /// a no-op.
    pub async fn revoke_token(&self, tool: &str, token: &str) -> Result<(), OAuthError> {
        let provider = self.provider(tool)?;
        let Some(revoke_url) = provider.revoke_url.as_deref() else {
            return Ok(());
        };
        let response = self
            .http
            .post(revoke_url)
            .bearer_auth(token)
            .form(&[
                ("token", token),
                ("client_id", provider.client_id.as_str()),
                ("client_secret", provider.client_secret.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Finish the browser leg of the flow and return the dashboard URL to
    /// redirect to.
    pub async fn handle_callback(&self, params: &CallbackParams) -> String {
        let dashboard = self.config.dashboard_url();
        match self.complete_callback(params).await {
            Ok(tool) => format!(
                "{}/integrations?success={}",
                dashboard,
                urlencoding::encode(&tool)
            ),
            Err(code) => format!(
                "{}/integrations?error={}",
                dashboard,
                urlencoding::encode(&code)
            ),
        }
    }

    async fn complete_callback(&self, params: &CallbackParams) -> Result<String, String> {
        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            warn!("OAuth provider returned error '{}'", error);
            return Err(error.to_string());
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| "missing_code".to_string())?;
        let state = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "invalid_state".to_string())?;

        let parsed = self.parse_oauth_state(state).await.map_err(|e| {
            warn!("OAuth state lookup failed: {}", e);
            "invalid_state".to_string()
        })?;
        let (Some(user_id), Some(tool), true) = (parsed.user_id, parsed.tool, parsed.is_valid)
        else {
            warn!("Rejected OAuth callback with invalid or reused state");
            return Err("invalid_state".to_string());
        };

        let tokens = match self.exchange_code(&tool, code).await {
            Ok(tokens) => tokens,
            Err(OAuthError::UnknownTool(_)) => return Err("unknown_tool".to_string()),
            Err(e) => {
                warn!("Token exchange for {} failed: {}", tool, e);
                return Err("token_exchange_failed".to_string());
            }
        };

        self.credentials
            .upsert_credential(&NewCredential {
                user_id: user_id.clone(),
                tool_name: tool.clone(),
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                expires_at: tokens.expires_at,
                scopes: tokens.scopes,
            })
            .await
            .map_err(|e| {
                warn!("Failed to store {} credential for {}: {}", tool, user_id, e);
                "storage_failed".to_string()
            })?;

        info!("Connected {} for user {}", tool, user_id);
        Ok(tool)
    }

    fn configured_provider(&self, tool: &str) -> Result<ResolvedProvider, OAuthError> {
        let provider = self.provider(tool)?;
        if !provider.is_configured() {
            return Err(OAuthError::NotConfigured(tool.to_string()));
        }
        Ok(provider)
    }

    async fn request_token(
        &self,
        provider: &ResolvedProvider,
        grant: &[(&str, &str)],
    ) -> Result<TokenSet, OAuthError> {
        let request = match provider.token_auth {
            TokenAuthStyle::FormBody => {
                let mut form = grant.to_vec();
                form.push(("client_id", provider.client_id.as_str()));
                form.push(("client_secret", provider.client_secret.as_str()));
                self.http.post(&provider.token_url).form(&form)
            }
            TokenAuthStyle::JsonBasic => {
                let body: serde_json::Map<String, serde_json::Value> = grant
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                    .collect();
                self.http
                    .post(&provider.token_url)
                    .basic_auth(&provider.client_id, Some(&provider.client_secret))
                    .json(&body)
            }
        };

        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OAuthError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| OAuthError::Provider(format!("unparseable token response: {}", e)))?;
        if token.ok == Some(false) || token.error.is_some() {
            let error = token.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(OAuthError::Provider(match token.error_description {
                Some(desc) => format!("{} - {}", error, desc),
                None => error,
            }));
        }

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(OAuthError::MissingAccessToken)?;
        Ok(TokenSet {
            access_token,
            refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            scopes: token
                .scope
                .map(|raw| provider.split_scopes(&raw))
                .unwrap_or_else(|| provider.scopes.clone()),
        })
    }
}
