use crate::core::config::ProviderSettings;

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAuthStyle {
    /// `application/x-www-form-urlencoded` body carrying client id and secret.
    FormBody,
    /// JSON body with HTTP basic client authentication (Notion).
    JsonBasic,
}

/// Static OAuth parameters for a supported tool.
#[derive(Debug)]
pub struct ProviderDefinition {
    pub tool: &'static str,
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub revoke_url: Option<&'static str>,
    pub scopes: &'static [&'static str],
    pub scope_separator: &'static str,
    pub extra_auth_params: &'static [(&'static str, &'static str)],
    pub token_auth: TokenAuthStyle,
}

pub const PROVIDERS: &[ProviderDefinition] = &[
    ProviderDefinition {
        tool: "asana",
        auth_url: "https://app.asana.com/-/oauth_authorize",
        token_url: "https://app.asana.com/-/oauth_token",
        revoke_url: Some("https://app.asana.com/-/oauth_revoke"),
        scopes: &["default"],
        scope_separator: " ",
        extra_auth_params: &[],
        token_auth: TokenAuthStyle::FormBody,
    },
    ProviderDefinition {
        tool: "gmail",
        auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        revoke_url: Some("https://oauth2.googleapis.com/revoke"),
        scopes: &[
            "https://www.googleapis.com/auth/gmail.send",
            "https://www.googleapis.com/auth/gmail.readonly",
        ],
        scope_separator: " ",
        extra_auth_params: &[("access_type", "offline"), ("prompt", "consent")],
        token_auth: TokenAuthStyle::FormBody,
    },
    ProviderDefinition {
        tool: "notion",
        auth_url: "https://api.notion.com/v1/oauth/authorize",
        token_url: "https://api.notion.com/v1/oauth/token",
        revoke_url: None,
        scopes: &[],
        scope_separator: " ",
        extra_auth_params: &[("owner", "user")],
        token_auth: TokenAuthStyle::JsonBasic,
    },
    ProviderDefinition {
        tool: "slack",
        auth_url: "https://slack.com/oauth/v2/authorize",
        token_url: "https://slack.com/api/oauth.v2.access",
        revoke_url: Some("https://slack.com/api/auth.revoke"),
        scopes: &[
            "chat:write",
            "channels:read",
            "channels:history",
            "users:read",
        ],
        scope_separator: ",",
        extra_auth_params: &[],
        token_auth: TokenAuthStyle::FormBody,
    },
];

pub fn provider_definition(tool: &str) -> Option<&'static ProviderDefinition> {
    PROVIDERS.iter().find(|p| p.tool == tool)
}

/// A provider definition merged with the deployment's client registration
/// and endpoint overrides.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub tool: String,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: Option<String>,
    pub scopes: Vec<String>,
    pub scope_separator: &'static str,
    pub extra_auth_params: &'static [(&'static str, &'static str)],
    pub token_auth: TokenAuthStyle,
}

impl ResolvedProvider {
    pub fn resolve(definition: &ProviderDefinition, settings: &ProviderSettings) -> Self {
        Self {
            tool: definition.tool.to_string(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            auth_url: settings
                .auth_url
                .clone()
                .unwrap_or_else(|| definition.auth_url.to_string()),
            token_url: settings
                .token_url
                .clone()
                .unwrap_or_else(|| definition.token_url.to_string()),
            revoke_url: settings
                .revoke_url
                .clone()
                .or_else(|| definition.revoke_url.map(str::to_string)),
            scopes: definition.scopes.iter().map(|s| s.to_string()).collect(),
            scope_separator: definition.scope_separator,
            extra_auth_params: definition.extra_auth_params,
            token_auth: definition.token_auth,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Providers echo granted scopes comma- or space-separated.
    pub fn split_scopes(&self, raw: &str) -> Vec<String> {
        raw.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
